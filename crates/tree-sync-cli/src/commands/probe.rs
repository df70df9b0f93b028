use anyhow::{Context, Result};
use tree_sync::{Instance, MirrorOverride, pull_mirror_available};

/// Report how repositories would reach the destination.
pub async fn run(destination: &Instance, mirror_override: MirrorOverride) -> Result<()> {
    let available = pull_mirror_available(destination.client(), mirror_override)
        .await
        .context("capability probe failed")?;

    if available {
        println!("{}: native pull mirroring is available.", destination.url());
    } else {
        println!(
            "{}: pull mirroring unavailable; repositories will be pushed with git.",
            destination.url()
        );
    }
    Ok(())
}
