//! The sync command: build the client, run the engine, print the report.

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use console::style;
use wikisnap::api::CromClient;
use wikisnap::http::reqwest_transport::ReqwestTransport;
use wikisnap::sync::{SyncEngine, SyncMode, SyncReport, SyncStatus};

use crate::config::Config;
use crate::progress::ProgressReporter;

/// Run one sync and print its report.
pub(crate) async fn handle_sync(
    mode: SyncMode,
    config: &Config,
    shutdown: Arc<AtomicBool>,
) -> Result<SyncReport, Box<dyn Error>> {
    let options = config.sync_options();
    std::fs::create_dir_all(&options.data_dir)?;
    tracing::debug!(data_dir = %options.data_dir.display(), "Using data directory");

    let transport = ReqwestTransport::with_timeout(config.request_timeout(), &config.api.user_agent)?;
    let client = CromClient::new(transport, config.api.endpoint.clone());
    let engine = SyncEngine::new(client, options).with_shutdown(shutdown);

    let reporter = Arc::new(ProgressReporter::new());
    let callback = reporter.as_callback();
    let result = engine.run(mode, Some(&callback)).await;
    reporter.finish();

    let report = result?;
    print_report(&report);
    Ok(report)
}

/// One row of the report table.
#[derive(Debug, Clone, tabled::Tabled)]
struct ReportRow {
    #[tabled(rename = "Metric")]
    metric: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn row(metric: &'static str, value: impl ToString) -> ReportRow {
    ReportRow {
        metric,
        value: value.to_string(),
    }
}

fn report_rows(report: &SyncReport) -> Vec<ReportRow> {
    let mut rows = vec![
        row("Mode", report.mode),
        row("Duration", format!("{:.1}s", report.duration.as_secs_f64())),
        row("Pages", report.pages_total),
        row(
            "Pages with votes",
            format!(
                "{} ({:.1}%)",
                report.pages_with_votes,
                report.votes_coverage_pct()
            ),
        ),
        row(
            "Pages with content",
            format!(
                "{} ({:.1}%)",
                report.pages_with_content,
                report.content_coverage_pct()
            ),
        ),
        row("Vote pages fetched", report.vote_pages_fetched),
        row("Vote pages unchanged", report.vote_pages_unchanged),
        row("Vote pages empty", report.vote_pages_empty),
    ];
    if report.vote_pages_restored > 0 {
        rows.push(row("Vote pages restored", report.vote_pages_restored));
    }
    rows.extend([
        row("Vote pages failed", report.vote_pages_failed),
        row("Votes", report.votes_collected),
        row("Users", report.users_derived),
        row(
            "Issues",
            format!(
                "{} (rate limited {}, transient {}, anomalies {}, fatal {})",
                report.issues.total(),
                report.issues.rate_limited,
                report.issues.transient,
                report.issues.data_anomaly,
                report.issues.fatal
            ),
        ),
    ]);
    rows
}

fn print_report(report: &SyncReport) {
    let mut table = tabled::Table::new(report_rows(report));
    table.with(tabled::settings::Style::rounded());
    println!("{table}");

    match (report.status, &report.snapshot_path) {
        (SyncStatus::Completed, Some(path)) => {
            println!(
                "{} Snapshot: {}",
                style("✓").green().bold(),
                path.display()
            );
        }
        (SyncStatus::Completed, None) => {}
        (SyncStatus::Interrupted, _) => {
            println!(
                "{} Interrupted; run `wikisnap resume` to continue",
                style("⚠").yellow().bold()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_report_rows_include_percentages() {
        let mut report = SyncReport::new(SyncMode::Full);
        report.duration = Duration::from_millis(2500);
        report.pages_total = 8;
        report.pages_with_votes = 6;
        report.pages_with_content = 2;

        let rows = report_rows(&report);
        let value = |name: &str| {
            rows.iter()
                .find(|r| r.metric == name)
                .map(|r| r.value.clone())
                .unwrap()
        };

        assert_eq!(value("Duration"), "2.5s");
        assert_eq!(value("Pages with votes"), "6 (75.0%)");
        assert_eq!(value("Pages with content"), "2 (25.0%)");
        assert!(rows.iter().all(|r| r.metric != "Vote pages restored"));
    }
}
