use crate::backends::{BackendError, CommandRunner, CommandSpec};
use crate::report::RunReport;
use tracing::{info, warn};

/// Compose an RFC 5322 message for `sendmail -t`.
pub fn compose_message(report: &RunReport, recipient: &str) -> String {
    format!(
        "To: {recipient}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}",
        report.subject(),
        report.render_text()
    )
}

/// Pipe the report to the local MTA. Returns whether delivery was handed
/// off; failures are logged and never affect the run outcome.
pub async fn send_report(runner: &dyn CommandRunner, report: &RunReport, recipient: &str) -> bool {
    match deliver(runner, report, recipient).await {
        Ok(()) => {
            info!("Report mailed to {}", recipient);
            true
        }
        Err(e) => {
            warn!("Could not mail report to {}: {}", recipient, e);
            false
        }
    }
}

async fn deliver(
    runner: &dyn CommandRunner,
    report: &RunReport,
    recipient: &str,
) -> Result<(), BackendError> {
    let spec = CommandSpec::new("sendmail")
        .arg("-t")
        .stdin(compose_message(report, recipient));
    runner.run(&spec).await?.require_success(&spec)?;
    Ok(())
}
