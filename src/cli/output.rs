use crate::report::{ApplyMode, RunReport, SectionStatus};
use crate::rollback::{RevertOutcome, RollbackSummary};

/// Print the end-of-run summary in human-readable format
pub fn print_run_report(report: &RunReport) {
    println!("🔧 Maintenance run {}", report.batch_id);
    println!("===================================================");

    for section in &report.sections {
        let icon = match section.status() {
            SectionStatus::Ok => "✅",
            SectionStatus::Errored => "❌",
        };
        let applied = match section.mode {
            ApplyMode::Skipped => "nothing applied".to_string(),
            ApplyMode::Bulk => match &section.bulk_transaction {
                Some(id) => format!("bulk transaction {id}"),
                None => "bulk upgrade, no changes".to_string(),
            },
            ApplyMode::Units => format!("{} updated", section.applied.len()),
        };
        println!(
            "{} {}: {} pending, {}",
            icon,
            section.label,
            section.pending.len(),
            applied
        );
        for warning in &section.warnings {
            println!("   ⚠️  {}", warning);
        }
        for error in &section.errors {
            println!("   {}", error);
        }
    }

    println!();
    println!("📝 {} history record(s) written", report.records_written);
    if report.reboot.is_required() {
        println!("⚠️  Reboot {}", report.reboot);
    } else {
        println!("Reboot: {}", report.reboot);
    }
}

pub fn print_cancelled(batch_id: &str) {
    println!("Run {} cancelled; nothing was changed.", batch_id);
}

/// Print the result of a rollback
pub fn print_rollback_summary(summary: &RollbackSummary) {
    let Some(batch_id) = &summary.batch_id else {
        println!("No recorded batch to roll back.");
        return;
    };

    println!("↩️  Rollback of batch {}", batch_id);
    println!("===================================================");
    for outcome in &summary.outcomes {
        match &outcome.outcome {
            RevertOutcome::Reverted => {
                println!("  ✅ {} {} -> {}", outcome.backend, outcome.unit, outcome.before)
            }
            RevertOutcome::Failed(reason) => {
                println!("  ❌ {} {}: {}", outcome.backend, outcome.unit, reason)
            }
        }
    }
    println!();
    println!(
        "{} reverted, {} failed, {} unreadable record(s) skipped",
        summary.succeeded, summary.failed, summary.skipped
    );
}
