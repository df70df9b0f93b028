use std::path::{Path, PathBuf};

/// Errors raised by the git transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GitError {
    #[error("clone failed: {0}")]
    Clone(String),

    #[error("remote setup failed: {0}")]
    Remote(String),

    #[error("push failed: {0}")]
    Push(String),

    #[error("cannot read HEAD: {0}")]
    Head(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

/// HTTPS credentials offered to a git remote.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

impl Credentials {
    /// Token credentials in the form hosting platforms accept over HTTPS.
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            username: "oauth2".to_owned(),
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Handle to a local bare repository created by a mirror clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BareRepo {
    pub path: PathBuf,
}

/// Low-level git operations used by the mirror engine.
///
/// Calls block the current thread; async callers go through
/// `spawn_blocking`.
pub trait GitTransport: Send + Sync {
    /// Bare-clone `url` into `dir`, fetching every ref.
    fn mirror_clone(
        &self,
        url: &str,
        credentials: &Credentials,
        dir: &Path,
    ) -> Result<BareRepo, GitError>;

    fn add_remote(&self, repo: &BareRepo, name: &str, url: &str) -> Result<(), GitError>;

    /// Force-push every ref of `repo` to `remote`.
    fn force_push_all_refs(
        &self,
        repo: &BareRepo,
        remote: &str,
        credentials: &Credentials,
    ) -> Result<(), GitError>;

    /// Target of the repository's symbolic HEAD, e.g. `refs/heads/main`.
    fn read_symbolic_head(&self, repo: &BareRepo) -> Result<String, GitError>;
}
