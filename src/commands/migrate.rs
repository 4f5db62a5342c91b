use tracing::{error, info};

use sitesync::migration::{CancelFlag, MigrationOutcome};

use crate::state::AppState;

pub async fn migrate(state: &AppState, projects: &[String]) -> anyhow::Result<()> {
    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, finishing in-flight uploads");
            on_interrupt.cancel();
        }
    });

    let results = state.pipeline.run_many(projects, &cancel).await;
    watcher.abort();

    let mut failures = 0;
    for (project_id, result) in results {
        match result {
            Ok(summary) => {
                let verdict = match summary.outcome {
                    MigrationOutcome::Migrated => "migrated",
                    MigrationOutcome::NoChanges if summary.nothing_to_migrate() => {
                        "nothing to migrate"
                    }
                    MigrationOutcome::NoChanges => "no changes",
                    MigrationOutcome::Cancelled => "cancelled, nothing written",
                };
                println!(
                    "project {}: {} ({} migrated, {} failed)",
                    project_id, verdict, summary.migrated_count, summary.failed_count
                );
                for record in summary.records.iter().filter(|r| r.error.is_some()) {
                    println!(
                        "  {} {}: {}",
                        record.document_id,
                        record.path,
                        record.error.as_deref().unwrap_or_default()
                    );
                }
            }
            Err(e) => {
                failures += 1;
                error!(project_id = %project_id, error = %e, "Migration failed");
                println!("project {}: failed ({})", project_id, e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} project(s) could not be migrated", failures);
    }
    Ok(())
}
