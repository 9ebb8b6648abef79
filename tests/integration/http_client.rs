#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use edgescan::{
    rpc::{HttpRangeScanClient, MemoryTable, PageRequest, RangeScanClient, TableTarget},
    scan::{RetryPolicy, ScanOptions, ScanRequest, ScanSession, StopReason},
    verify::CategoryReconciler,
    Category, Cursor, Edge, EdgeId, ScanError,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

const ROUTE: &str = "/v1/chain/get_table_rows";

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(endpoint: &str) -> HttpRangeScanClient {
    HttpRangeScanClient::new(endpoint, Duration::from_secs(5)).unwrap()
}

fn first_page() -> PageRequest {
    let mut request = PageRequest::new(TableTarget::default(), 500);
    request.lower_bound = Some(Cursor::new("29983"));
    request
}

type Seen = Arc<Mutex<Vec<Value>>>;

async fn record(State(seen): State<Seen>, Json(body): Json<Value>) -> Json<Value> {
    seen.lock().push(body);
    Json(json!({
        "rows": [
            {
                "id": "4021",
                "from_node": 29983,
                "to_node": "88123",
                "edge_name": "closedprops",
                "created_date": "2021-06-01T10:00:00.000",
                "contract": "dao.hypha"
            },
            {
                "id": 4022,
                "from_node": "29983",
                "to_node": 88124,
                "edge_name": "ownedby"
            }
        ],
        "more": true,
        "next_key": "29983"
    }))
}

#[tokio::test]
async fn posts_the_table_rows_body_and_parses_the_page() {
    let seen: Seen = Arc::default();
    let router = Router::new()
        .route(ROUTE, post(record))
        .with_state(Arc::clone(&seen));
    let endpoint = serve(router).await;

    let page = client(&format!("{endpoint}/"))
        .fetch_page(&first_page())
        .await
        .unwrap();

    let bodies = seen.lock().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(
        bodies[0],
        json!({
            "code": "dao.hypha",
            "scope": "dao.hypha",
            "table": "edges",
            "index_position": 2,
            "key_type": "i64",
            "lower_bound": "29983",
            "limit": 500,
            "json": true
        })
    );

    assert_eq!(page.rows.len(), 2);
    assert_eq!(page.rows[0].id, EdgeId::from(4021u64));
    assert_eq!(page.rows[0].category, Category::ClosedProps);
    assert_eq!(
        page.rows[0].created_date.as_deref(),
        Some("2021-06-01T10:00:00.000")
    );
    assert_eq!(page.rows[1].category, Category::from_name("ownedby"));
    assert!(page.more);
    assert_eq!(page.next_key, Some(Cursor::new("29983")));
}

#[tokio::test]
async fn server_errors_are_transport_errors() {
    let router = Router::new().route(
        ROUTE,
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "database is locked") }),
    );
    let endpoint = serve(router).await;

    let err = client(&endpoint)
        .fetch_page(&first_page())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Transport(_)));
    assert!(err.is_retryable());
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn malformed_bodies_are_protocol_errors() {
    let router = Router::new().route(ROUTE, post(|| async { "<html>bad gateway</html>" }));
    let endpoint = serve(router).await;
    let err = client(&endpoint)
        .fetch_page(&first_page())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Protocol(_)));

    let router = Router::new().route(
        ROUTE,
        post(|| async { Json(json!({"rows": [{"id": 1}], "more": false})) }),
    );
    let endpoint = serve(router).await;
    let err = client(&endpoint)
        .fetch_page(&first_page())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Protocol(_)));
}

#[tokio::test]
async fn empty_next_key_means_no_cursor() {
    let router = Router::new().route(
        ROUTE,
        post(|| async { Json(json!({"rows": [], "more": false, "next_key": ""})) }),
    );
    let endpoint = serve(router).await;
    let page = client(&endpoint)
        .fetch_page(&first_page())
        .await
        .unwrap();
    assert!(page.rows.is_empty());
    assert_eq!(page.next_key, None);
}

#[tokio::test]
async fn unreachable_node_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}"))
        .fetch_page(&first_page())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Transport(_)));
}

async fn table_rows(State(table): State<Arc<MemoryTable>>, Json(body): Json<Value>) -> Json<Value> {
    let limit = body["limit"].as_u64().unwrap_or(0) as u32;
    let mut request = PageRequest::new(TableTarget::default(), limit);
    request.lower_bound = body["lower_bound"].as_str().map(Cursor::new);
    request.upper_bound = body["upper_bound"].as_str().map(Cursor::new);
    let page = table.fetch_page(&request).await.unwrap();
    Json(json!({
        "rows": page.rows,
        "more": page.more,
        "next_key": page.next_key.map(|cursor| cursor.0).unwrap_or_default(),
    }))
}

#[tokio::test]
async fn full_session_over_http() {
    let mut rows: Vec<Edge> = (1..=40u64)
        .map(|id| Edge::new(id, 29983u64, 1_000 + id, Category::ClosedProps))
        .collect();
    rows.extend(
        (41..=45u64).map(|id| Edge::new(id, 29983u64, 960 + id, Category::PassedProps)),
    );
    rows.extend((46..=60u64).map(|id| Edge::new(id, 30_000u64, id, Category::Proposal)));
    let table = Arc::new(MemoryTable::new(rows));
    let router = Router::new()
        .route(ROUTE, post(table_rows))
        .with_state(Arc::clone(&table));
    let endpoint = serve(router).await;

    let options = ScanOptions::default()
        .page_size(16)
        .inter_batch_delay(Duration::from_millis(1))
        .retry(RetryPolicy::none());
    let result = ScanSession::new(client(&endpoint), ScanRequest::new(29983u64), options)
        .run()
        .await;

    assert!(result.is_complete());
    assert_eq!(result.stop_reason, StopReason::Exhausted);
    assert_eq!(result.unique_edges(), 45);
    assert_eq!(result.rows_filtered_out, 15);
    assert_eq!(result.batches_fetched, 4);
    assert_eq!(table.request_count(), 4);

    let reconciliation = CategoryReconciler::new().reconcile(&result);
    assert_eq!(reconciliation.total, 40);
    assert!(reconciliation.is_clean());
}
