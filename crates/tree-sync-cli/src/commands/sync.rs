use std::sync::Arc;

use anyhow::Result;
use tree_sync::sync::{self, SyncOptions};
use tree_sync::{GitTransport, Instance, Mapping, ReconcileSummary, Tally};

fn tally_line(label: &str, tally: &Tally) -> String {
    format!(
        "{label:<9} {} created, {} updated, {} unchanged, {} failed",
        tally.created, tally.patched, tally.unchanged, tally.failed
    )
}

pub fn format_summary(summary: &ReconcileSummary) -> String {
    format!(
        "{}\n{}",
        tally_line("Groups:", &summary.groups),
        tally_line("Projects:", &summary.projects)
    )
}

/// Run a full sync and print the summary to stdout, failures to stderr.
pub async fn run(
    source: Arc<Instance>,
    destination: Arc<Instance>,
    mapping: Arc<Mapping>,
    git: Arc<dyn GitTransport>,
    options: &SyncOptions,
) -> Result<()> {
    println!("Syncing {} -> {}...", source.url(), destination.url());

    let report = sync::run(source, destination, mapping, git, options).await?;

    println!(
        "Repositories {}.",
        if report.pull_mirror {
            "pull-mirrored by the destination"
        } else {
            "pushed with git"
        }
    );
    println!("{}", format_summary(&report.summary));

    if let Err(errors) = report.into_result() {
        anyhow::bail!("sync incomplete, {errors}");
    }
    Ok(())
}
