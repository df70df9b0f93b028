use std::path::PathBuf;
use std::sync::Arc;

use crate::git::{Credentials, GitError, GitTransport};

/// Name under which the destination is registered in the scratch clone.
pub const DESTINATION_REMOTE: &str = "destination";

/// Everything needed to copy one repository at the git level.
#[derive(Debug, Clone)]
pub struct MirrorJob {
    pub source_url: String,
    pub source_credentials: Credentials,
    pub destination_url: String,
    pub destination_credentials: Credentials,
}

/// Copies repositories by bare mirror clone and force push, for
/// destinations that cannot pull-mirror natively.
#[derive(Clone)]
pub struct MirrorEngine {
    transport: Arc<dyn GitTransport>,
    scratch_dir: Option<PathBuf>,
}

impl MirrorEngine {
    /// `scratch_dir` is where temporary clones go; the system temp
    /// directory when `None`.
    pub fn new(transport: Arc<dyn GitTransport>, scratch_dir: Option<PathBuf>) -> Self {
        Self {
            transport,
            scratch_dir,
        }
    }

    /// Mirror one repository and return the source's HEAD target
    /// (e.g. `refs/heads/main`) so the caller can repair the destination's
    /// default branch.
    pub async fn mirror(&self, job: MirrorJob) -> Result<String, GitError> {
        let transport = Arc::clone(&self.transport);
        let scratch_dir = self.scratch_dir.clone();

        tokio::task::spawn_blocking(move || {
            mirror_blocking(transport.as_ref(), scratch_dir, &job)
        })
        .await
        .map_err(|e| GitError::Other(format!("mirror worker failed: {e}")))?
    }
}

fn mirror_blocking(
    transport: &dyn GitTransport,
    scratch_dir: Option<PathBuf>,
    job: &MirrorJob,
) -> Result<String, GitError> {
    let builder = {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tree-sync-");
        builder
    };
    let scratch = match &scratch_dir {
        Some(dir) => builder.tempdir_in(dir),
        None => builder.tempdir(),
    }
    .map_err(|e| GitError::Io(format!("cannot create scratch directory: {e}")))?;

    tracing::debug!(
        source = %job.source_url,
        scratch = %scratch.path().display(),
        "mirror clone"
    );
    let repo = transport.mirror_clone(
        &job.source_url,
        &job.source_credentials,
        &scratch.path().join("repo.git"),
    )?;
    transport.add_remote(&repo, DESTINATION_REMOTE, &job.destination_url)?;
    transport.force_push_all_refs(&repo, DESTINATION_REMOTE, &job.destination_credentials)?;
    let head = transport.read_symbolic_head(&repo)?;

    tracing::debug!(destination = %job.destination_url, %head, "mirror pushed");
    Ok(head)
}

/// Branch name behind a symbolic HEAD target.
pub fn branch_name(head: &str) -> &str {
    head.strip_prefix("refs/heads/").unwrap_or(head)
}
