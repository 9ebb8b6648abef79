use std::time::Duration;

use tracing::{debug, trace};

use super::{PageRequest, PageResult, RangeScanClient};
use crate::{Result, ScanError};

const TABLE_ROWS_PATH: &str = "/v1/chain/get_table_rows";
const ERROR_BODY_PREVIEW: usize = 256;

/// `get_table_rows` over HTTP.
#[derive(Clone, Debug)]
pub struct HttpRangeScanClient {
    url: String,
    client: reqwest::Client,
}

impl HttpRangeScanClient {
    /// Builds a client for `endpoint` (scheme and host, optionally a path
    /// prefix). `timeout` bounds every individual request.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ScanError::Config(format!("failed to create HTTP client: {err}")))?;
        Ok(Self {
            url: format!("{}{TABLE_ROWS_PATH}", endpoint.trim_end_matches('/')),
            client,
        })
    }

    /// Full URL the client posts to.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, request: &PageRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(ScanError::Transport(format!(
                "HTTP {status}: {}",
                preview(&body)
            )));
        }
        Ok(body)
    }
}

impl RangeScanClient for HttpRangeScanClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<PageResult> {
        trace!(
            url = %self.url,
            lower_bound = request.lower_bound.as_ref().map(|c| c.as_str()),
            limit = request.limit,
            "rpc.get_table_rows.request"
        );
        let body = self.post(request).await?;
        let page: PageResult = serde_json::from_str(&body).map_err(|err| {
            ScanError::Protocol(format!("unexpected get_table_rows response: {err}"))
        })?;
        debug!(
            rows = page.rows.len(),
            more = page.more,
            next_key = page.next_key.as_ref().map(|c| c.as_str()),
            "rpc.get_table_rows.response"
        );
        Ok(page)
    }
}

fn transport_error(err: reqwest::Error) -> ScanError {
    if err.is_timeout() {
        ScanError::Transport(format!("request timed out: {err}"))
    } else if err.is_connect() {
        ScanError::Transport(format!("connection failed: {err}"))
    } else {
        ScanError::Transport(err.to_string())
    }
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_PREVIEW) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
