//! Binary entry point for the edgescan CLI.
#![forbid(unsafe_code)]

#[path = "cli/ui.rs"]
mod ui;

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use edgescan::{
    config::{EdgescanConfig, ScanSettings, SettingsOverride},
    rpc::{HttpRangeScanClient, MemoryTable, RangeScanClient},
    scan::{CancelToken, ScanResult, ScanSession, StopReason},
    verify::{CategoryReconciler, ConsistencyReport, InvariantViolation, Reconciliation, Verdict},
    CategoryFilter, Edge, Key, NodeId, ScanError,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ui::{format_duration, ColorMode, Ui};

const EXIT_CLEAN: i32 = 0;
const EXIT_FINDINGS: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "edgescan",
    version,
    about = "Enumerate and verify a DAO's proposal edges on a ledger node",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Config file to read")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_name = "NAME", help = "Config profile to use")]
    profile: Option<String>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for reports"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = ColorMode::Auto,
        help = "When to color text output"
    )]
    color: ColorMode,

    #[arg(
        long,
        short,
        global = true,
        help = "Suppress progress and lower log level to warn"
    )]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct TargetArgs {
    #[arg(long, value_name = "URL", help = "Node base URL")]
    endpoint: Option<String>,

    #[arg(long, value_name = "ACCOUNT", help = "Contract account (code and scope)")]
    contract: Option<String>,

    #[arg(long, value_name = "NODE", help = "DAO node whose edges are collected")]
    origin: Option<String>,

    #[arg(
        long,
        value_name = "a,b,c",
        help = "Comma-separated edge names to keep, or 'all'"
    )]
    categories: Option<String>,

    #[arg(long, value_name = "ROWS", help = "Rows requested per page")]
    page_size: Option<u32>,

    #[arg(long, value_name = "PAGES", help = "Page cap before the scan is truncated")]
    max_batches: Option<u32>,

    #[arg(long, value_name = "MS", help = "Pause between pages")]
    delay_ms: Option<u64>,

    #[arg(long, value_name = "N", help = "Retries per page on transport errors")]
    retries: Option<u32>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Scan a JSON array of rows instead of the node"
    )]
    fixture: Option<PathBuf>,
}

impl TargetArgs {
    fn overrides(&self) -> Result<SettingsOverride, Box<dyn Error>> {
        let categories = match self.categories.as_deref() {
            Some(raw) => Some(
                CategoryFilter::parse(raw).map_err(|reason| format!("--categories: {reason}"))?,
            ),
            None => None,
        };
        Ok(SettingsOverride {
            endpoint: self.endpoint.clone(),
            contract: self.contract.clone(),
            origin: self.origin.as_deref().map(|raw| NodeId(Key::parse(raw))),
            categories,
            page_size: self.page_size,
            max_batches: self.max_batches,
            inter_batch_delay_ms: self.delay_ms,
            max_retries: self.retries,
            ..SettingsOverride::default()
        })
    }
}

#[derive(Args, Debug)]
struct ScanCmd {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long, help = "Include the collected edges in JSON output")]
    edges: bool,
}

#[derive(Args, Debug)]
struct VerifyCmd {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long, value_name = "N", help = "Number of full scans to compare")]
    runs: Option<usize>,

    #[arg(long, value_name = "MS", help = "Pause between sequential runs")]
    run_delay_ms: Option<u64>,

    #[arg(long, help = "Run the scans concurrently")]
    concurrent: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigCmd {
    #[command(about = "Print the config file location")]
    Path,

    #[command(about = "Print the resolved settings")]
    Show {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Collect an origin's edges once and reconcile the categories")]
    Scan(ScanCmd),

    #[command(about = "Repeat the scan and check the node answers consistently")]
    Verify(VerifyCmd),

    #[command(subcommand, about = "Inspect configuration")]
    Config(ConfigCmd),

    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32, Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);
    let ui = Ui::new(cli.color, cli.quiet);

    match &cli.command {
        Command::Scan(cmd) => {
            let settings = resolve_settings(&cli, &cmd.target, None)?;
            let source = Source::open(&settings, cmd.target.fixture.as_deref())?;
            match source {
                Source::Node(client) => run_scan(&cli, &ui, cmd, &settings, client).await,
                Source::Fixture(table) => run_scan(&cli, &ui, cmd, &settings, table).await,
            }
        }
        Command::Verify(cmd) => {
            let overrides = SettingsOverride {
                consistency_runs: cmd.runs,
                inter_run_delay_ms: cmd.run_delay_ms,
                ..SettingsOverride::default()
            };
            let settings = resolve_settings(&cli, &cmd.target, Some(&overrides))?;
            let source = Source::open(&settings, cmd.target.fixture.as_deref())?;
            match source {
                Source::Node(client) => run_verify(&cli, &ui, cmd, &settings, client).await,
                Source::Fixture(table) => run_verify(&cli, &ui, cmd, &settings, table).await,
            }
        }
        Command::Config(ConfigCmd::Path) => {
            let config = EdgescanConfig::load(cli.config.clone())?;
            match config.path() {
                Some(path) => println!("{}", path.display()),
                None => ui.warn("no config directory found; pass --config or set EDGESCAN_CONFIG"),
            }
            Ok(EXIT_CLEAN)
        }
        Command::Config(ConfigCmd::Show { target }) => {
            let settings = resolve_settings(&cli, target, None)?;
            emit(cli.format, &settings, || print_settings_text(&ui, &settings))?;
            Ok(EXIT_CLEAN)
        }
        Command::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(*shell, &mut command, "edgescan", &mut std::io::stdout());
            Ok(EXIT_CLEAN)
        }
    }
}

fn init_tracing(quiet: bool) {
    let fallback = if quiet { "edgescan=warn" } else { "edgescan=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn resolve_settings(
    cli: &Cli,
    target: &TargetArgs,
    extra: Option<&SettingsOverride>,
) -> Result<ScanSettings, Box<dyn Error>> {
    let config = EdgescanConfig::load(cli.config.clone())?;
    let mut settings = config.settings(cli.profile.as_deref())?;
    settings.apply(&target.overrides()?);
    if let Some(extra) = extra {
        settings.apply(extra);
    }
    settings.validate()?;
    Ok(settings)
}

enum Source {
    Node(Arc<HttpRangeScanClient>),
    Fixture(Arc<MemoryTable>),
}

impl Source {
    fn open(settings: &ScanSettings, fixture: Option<&Path>) -> Result<Self, Box<dyn Error>> {
        match fixture {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .map_err(|err| format!("failed to read fixture {}: {err}", path.display()))?;
                let rows: Vec<Edge> = serde_json::from_str(&contents)
                    .map_err(|err| format!("failed to parse fixture {}: {err}", path.display()))?;
                Ok(Source::Fixture(Arc::new(MemoryTable::new(rows))))
            }
            None => {
                let client =
                    HttpRangeScanClient::new(&settings.endpoint, settings.request_timeout())?;
                Ok(Source::Node(Arc::new(client)))
            }
        }
    }
}

fn source_label(settings: &ScanSettings, fixture: Option<&Path>) -> String {
    match fixture {
        Some(path) => format!("fixture:{}", path.display()),
        None => settings.endpoint.clone(),
    }
}

fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let trip = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("cli.interrupt");
            trip.cancel();
        }
    });
    token
}

#[derive(Serialize)]
struct ScanReport<'a> {
    origin: &'a NodeId,
    source: String,
    categories: &'a CategoryFilter,
    batches: u32,
    rows_seen: u64,
    rows_filtered_out: u64,
    duplicates_removed: u64,
    truncated: bool,
    stop_reason: StopReason,
    error: Option<&'a ScanError>,
    duration_ms: f64,
    #[serde(flatten)]
    reconciliation: &'a Reconciliation,
    #[serde(skip_serializing_if = "Option::is_none")]
    edges: Option<Vec<&'a Edge>>,
}

async fn run_scan<C>(
    cli: &Cli,
    ui: &Ui,
    cmd: &ScanCmd,
    settings: &ScanSettings,
    client: Arc<C>,
) -> Result<i32, Box<dyn Error>>
where
    C: RangeScanClient + Send + Sync + 'static,
{
    let request = settings.scan_request()?;
    let session = ScanSession::new(client, request.clone(), settings.scan_options())
        .with_cancel(cancel_on_ctrl_c());

    let progress = ui.scan_progress(format!("origin {}", request.origin));
    let result = session
        .run_with_progress(|batch| progress.batch(batch))
        .await;
    progress.finish();

    let reconciliation = CategoryReconciler::new().reconcile(&result);
    let report = ScanReport {
        origin: &request.origin,
        source: source_label(settings, cmd.target.fixture.as_deref()),
        categories: &request.categories,
        batches: result.batches_fetched,
        rows_seen: result.rows_seen,
        rows_filtered_out: result.rows_filtered_out,
        duplicates_removed: result.duplicates_removed,
        truncated: result.truncated,
        stop_reason: result.stop_reason,
        error: result.error.as_ref(),
        duration_ms: result.duration_ms,
        reconciliation: &reconciliation,
        edges: cmd.edges.then(|| result.edges.values().collect()),
    };
    emit(cli.format, &report, || print_scan_text(ui, &report, &result))?;

    Ok(if reconciliation.is_clean() {
        EXIT_CLEAN
    } else {
        EXIT_FINDINGS
    })
}

#[derive(Serialize)]
struct VerifyReport<'a> {
    origin: &'a NodeId,
    source: String,
    concurrent: bool,
    #[serde(flatten)]
    consistency: &'a ConsistencyReport,
    total: Option<u64>,
}

async fn run_verify<C>(
    cli: &Cli,
    ui: &Ui,
    cmd: &VerifyCmd,
    settings: &ScanSettings,
    client: Arc<C>,
) -> Result<i32, Box<dyn Error>>
where
    C: RangeScanClient + Send + Sync + 'static,
{
    let request = settings.scan_request()?;
    let options = settings.scan_options();
    let verifier = settings.verifier();
    let cancel = cancel_on_ctrl_c();

    let runs = verifier.runs();
    let progress = ui.verify_progress(format!("verifying origin {}", request.origin));
    if cmd.concurrent {
        progress.note(format!("{runs} runs in flight"));
    }
    let session = |run: usize| {
        if let Some(message) = run_message(cmd.concurrent, run, runs) {
            progress.note(message);
        }
        ScanSession::new(Arc::clone(&client), request.clone(), options.clone())
            .with_cancel(cancel.clone())
            .run()
    };
    let verification = if cmd.concurrent {
        verifier.verify_concurrent(session).await
    } else {
        verifier.verify(session).await
    };
    progress.finish();

    let report = &verification.report;
    let total = report
        .is_trustworthy()
        .then(|| verification.results.first())
        .flatten()
        .map(|result| CategoryReconciler::new().reconcile(result).total);
    let output = VerifyReport {
        origin: &request.origin,
        source: source_label(settings, cmd.target.fixture.as_deref()),
        concurrent: cmd.concurrent,
        consistency: report,
        total,
    };
    emit(cli.format, &output, || print_verify_text(ui, &output))?;

    Ok(if report.is_trustworthy() {
        EXIT_CLEAN
    } else {
        EXIT_FINDINGS
    })
}

/// Spinner text as sequential run `run` starts. Concurrent runs all start at
/// once, so they keep the message set before the first one.
fn run_message(concurrent: bool, run: usize, runs: usize) -> Option<String> {
    (!concurrent).then(|| format!("run {}/{runs}", run + 1))
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_scan_text(ui: &Ui, report: &ScanReport<'_>, result: &ScanResult) {
    ui.section(
        "Scan",
        [
            ("origin", report.origin.to_string()),
            ("source", report.source.clone()),
            ("categories", report.categories.to_string()),
            ("batches", report.batches.to_string()),
            ("rows seen", report.rows_seen.to_string()),
            ("filtered out", report.rows_filtered_out.to_string()),
            ("duplicates", report.duplicates_removed.to_string()),
            ("unique edges", report.reconciliation.unique_edges.to_string()),
            ("stopped", format!("{:?}", report.stop_reason)),
            (
                "duration",
                format_duration(std::time::Duration::from_secs_f64(
                    result.duration_ms / 1_000.0,
                )),
            ),
        ],
    );
    ui.section("Categories", category_rows(&report.reconciliation.by_category));

    if let Some(err) = report.error {
        ui.warn(&format!("scan aborted after {} batches: {err}", report.batches));
    } else if report.truncated {
        ui.warn(&format!(
            "scan truncated ({:?}); the total below is a lower bound",
            report.stop_reason
        ));
    }
    if !result.conflicts.is_empty() {
        ui.warn(&format!(
            "{} edge ids were replayed with different content",
            result.conflicts.len()
        ));
    }
    let reconciliation = report.reconciliation;
    if !reconciliation.total_trusted {
        ui.warn(&format!(
            "categories {} leave out part of proposal,closedprops,stagingprop; \
             the total below is not the DAO's",
            report.categories
        ));
    }
    if !reconciliation.skipped_checks.is_empty() {
        let skipped: Vec<&str> = reconciliation
            .skipped_checks
            .iter()
            .map(|category| category.as_str())
            .collect();
        ui.warn(&format!(
            "closedprops check skipped for {}",
            skipped.join(",")
        ));
    }
    print_violations(ui, reconciliation);

    ui.outcome(
        reconciliation.is_clean(),
        &format!("total proposals: {}", reconciliation.total),
    );
}

fn category_rows(counts: &BTreeMap<String, u64>) -> Vec<(String, u64)> {
    counts
        .iter()
        .map(|(name, count)| (name.clone(), *count))
        .collect()
}

fn print_violations(ui: &Ui, reconciliation: &Reconciliation) {
    if reconciliation.violation_count == 0 {
        return;
    }
    ui.list(
        &format!("Violations ({})", reconciliation.violation_count),
        reconciliation
            .violations
            .iter()
            .map(|violation: &InvariantViolation| violation.message.clone()),
    );
    let hidden = reconciliation.violation_count - reconciliation.violations.len() as u64;
    if hidden > 0 {
        ui.warn(&format!("{hidden} more violations not shown"));
    }
}

fn print_verify_text(ui: &Ui, output: &VerifyReport<'_>) {
    let report = output.consistency;
    ui.section(
        "Consistency",
        [
            ("origin", output.origin.to_string()),
            ("source", output.source.clone()),
            ("runs", report.runs.len().to_string()),
            ("min", report.min.to_string()),
            ("max", report.max.to_string()),
            ("variance", report.variance.to_string()),
            ("divergent ids", report.divergent_ids.to_string()),
        ],
    );
    ui.list(
        "Runs",
        report.runs.iter().map(|run| {
            let mut line = format!(
                "run {}: {} edges in {} batches ({:?})",
                run.run + 1,
                run.unique_edges,
                run.batches,
                run.stop_reason
            );
            if let Some(err) = &run.error {
                line.push_str(&format!(", {err}"));
            }
            line
        }),
    );

    let spread = format!(
        "variance {} over {} runs, {} divergent ids",
        report.variance,
        report.runs.len(),
        report.divergent_ids
    );
    let line = match output.total {
        Some(total) if report.is_trustworthy() => {
            format!("{} ({spread}); total proposals: {total}", verdict_label(report.verdict))
        }
        _ => format!("{} ({spread})", verdict_label(report.verdict)),
    };
    ui.outcome(report.is_trustworthy(), &line);
}

fn verdict_label(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Consistent => "consistent",
        Verdict::NonDeterministic => "non-deterministic",
        Verdict::Incomplete => "incomplete",
    }
}

fn print_settings_text(ui: &Ui, settings: &ScanSettings) {
    let origin = settings
        .origin
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "(unset)".to_string());
    ui.section(
        "Settings",
        [
            (
                "profile",
                settings.profile.clone().unwrap_or_else(|| "(none)".into()),
            ),
            ("endpoint", settings.endpoint.clone()),
            ("contract", settings.contract.clone()),
            ("origin", origin),
            ("categories", settings.categories.to_string()),
            ("page_size", settings.page_size.to_string()),
            ("max_batches", settings.max_batches.to_string()),
            (
                "inter_batch_delay_ms",
                settings.inter_batch_delay_ms.to_string(),
            ),
            ("max_retries", settings.max_retries.to_string()),
            ("retry_delay_ms", settings.retry_delay_ms.to_string()),
            ("backoff", format!("{:?}", settings.backoff)),
            ("request_timeout_ms", settings.request_timeout_ms.to_string()),
            ("consistency_runs", settings.consistency_runs.to_string()),
            ("inter_run_delay_ms", settings.inter_run_delay_ms.to_string()),
            ("cursor_seed", format!("{:?}", settings.cursor_seed)),
            ("bound_to_origin", settings.bound_to_origin.to_string()),
        ],
    );
}
