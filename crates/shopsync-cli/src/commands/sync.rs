use shopsync_core::config::ClientConfig;
use shopsync_core::db::ActionLog;
use shopsync_core::sync::{DrainOutcome, SyncProcessor, SyncStatus, Transport};

use crate::commands::common::{format_status_line, open_database};
use crate::error::CliError;

pub async fn run_sync(config: &ClientConfig) -> Result<(), CliError> {
    let db = open_database(config).await?;
    let processor = SyncProcessor::new(db.action_log(), config.transport()?, config.sync_policy());

    let (outcome, status) = drain_once(&processor).await?;
    if let Some(line) = format_outcome_line(outcome) {
        println!("{line}");
    }
    println!("{}", format_status_line(&status));
    Ok(())
}

/// One replay pass followed by a fresh status read
pub async fn drain_once<L, T>(
    processor: &SyncProcessor<L, T>,
) -> Result<(DrainOutcome, SyncStatus), CliError>
where
    L: ActionLog,
    T: Transport,
{
    let outcome = processor.process_queue().await?;
    let status = processor.refresh_status().await?;
    Ok((outcome, status))
}

pub fn format_outcome_line(outcome: DrainOutcome) -> Option<String> {
    match outcome {
        DrainOutcome::AlreadyRunning => None,
        DrainOutcome::Completed(report) if report.attempted == 0 => {
            Some("Nothing eligible to replay".to_string())
        }
        DrainOutcome::Completed(report) => {
            let mut line = format!(
                "Replayed {} of {} actions",
                report.succeeded, report.attempted
            );
            if report.failed > 0 {
                line.push_str(&format!(", {} failed", report.failed));
            }
            if report.dead_lettered > 0 {
                line.push_str(&format!(", {} dead-lettered", report.dead_lettered));
            }
            Some(line)
        }
    }
}
