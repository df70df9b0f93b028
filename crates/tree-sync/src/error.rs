use std::fmt;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::git::GitError;
use crate::remote::RemoteError;

/// Failure of a single unit of sync work, or of the run itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// A remote call for one resource failed.
    #[error("failed to {action} {path}: {source}")]
    Remote {
        action: &'static str,
        path: String,
        #[source]
        source: RemoteError,
    },

    /// A resource was found beneath a mapped group that is no longer mapped.
    #[error("no mapping for group {group} (needed by {path})")]
    MissingMapping { group: String, path: String },

    /// A destination path has no cached parent group to create it in.
    #[error("parent group {parent} of {path} does not exist on the destination")]
    MissingParent { path: String, parent: String },

    /// Two source resources would land on the same destination path. The
    /// first one keeps it; the second is not copied.
    #[error("{second} maps to {destination}, which is already the destination of {first}")]
    DestinationConflict {
        destination: String,
        first: String,
        second: String,
    },

    /// A mapped source resource was never fetched.
    #[error("{path} was not found on the source instance")]
    MissingSource { path: String },

    #[error("git mirror of {path} failed: {source}")]
    Git {
        path: String,
        #[source]
        source: GitError,
    },

    /// The bulk listing of an instance failed; the run cannot continue.
    #[error("failed to list {what} on {instance}: {source}")]
    Listing {
        what: &'static str,
        instance: String,
        #[source]
        source: RemoteError,
    },

    /// The mirror-capability probe failed; the run cannot continue.
    #[error("capability probe failed: {0}")]
    Probe(#[source] RemoteError),

    /// A concurrent unit panicked or was cancelled.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl SyncError {
    pub fn remote(action: &'static str, path: impl Into<String>, source: RemoteError) -> Self {
        Self::Remote {
            action,
            path: path.into(),
            source,
        }
    }

    /// True for errors that abort a whole run rather than a single unit.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Listing { .. } | Self::Probe(_))
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Worker(err.to_string())
    }
}

/// Collects unit failures from every stage of a run.
///
/// Accepts single errors, optional errors, collections and error channels
/// alike, and keeps them in arrival order.
#[derive(Debug, Default)]
pub struct Aggregator {
    errors: Vec<SyncError>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error. `None` is ignored.
    pub fn push(&mut self, error: impl Into<Option<SyncError>>) {
        if let Some(error) = error.into() {
            self.errors.push(error);
        }
    }

    /// Record the error side of a result and hand back the success value.
    pub fn check<T>(&mut self, result: Result<T, SyncError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.errors.push(error);
                None
            }
        }
    }

    /// Drain an error stream until every sender has gone away.
    pub async fn drain(&mut self, mut errors: UnboundedReceiver<SyncError>) {
        while let Some(error) = errors.recv().await {
            self.errors.push(error);
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[SyncError] {
        &self.errors
    }

    /// `Ok(())` when nothing failed, otherwise every failure in one error.
    pub fn finish(self) -> Result<(), MultiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(MultiError {
                errors: self.errors,
            })
        }
    }
}

impl Extend<SyncError> for Aggregator {
    fn extend<I: IntoIterator<Item = SyncError>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}

impl Extend<Option<SyncError>> for Aggregator {
    fn extend<I: IntoIterator<Item = Option<SyncError>>>(&mut self, iter: I) {
        self.errors.extend(iter.into_iter().flatten());
    }
}

impl IntoIterator for Aggregator {
    type Item = SyncError;
    type IntoIter = std::vec::IntoIter<SyncError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

/// Every failure of a run, rendered one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiError {
    errors: Vec<SyncError>,
}

impl MultiError {
    pub fn errors(&self) -> &[SyncError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.errors.len();
        write!(f, "{count} error{} occurred:", if count == 1 { "" } else { "s" })?;
        for error in &self.errors {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn missing(path: &str) -> SyncError {
        SyncError::MissingSource { path: path.into() }
    }

    #[test]
    fn empty_aggregator_finishes_ok() {
        assert!(Aggregator::new().finish().is_ok());
    }

    #[test]
    fn push_drops_none() {
        let mut agg = Aggregator::new();
        agg.push(None::<SyncError>);
        agg.push(missing("a"));
        agg.push(Some(missing("b")));
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn extend_accepts_plain_and_optional_errors() {
        let mut agg = Aggregator::new();
        agg.extend(vec![missing("a"), missing("b")]);
        agg.extend(vec![None, Some(missing("c")), None]);
        let paths: Vec<String> = agg.errors().iter().map(|e| e.to_string()).collect();
        assert_eq!(paths.len(), 3);
        assert!(paths[2].contains('c'));
    }

    #[test]
    fn check_passes_values_through() {
        let mut agg = Aggregator::new();
        assert_eq!(agg.check(Ok::<_, SyncError>(7)), Some(7));
        assert_eq!(agg.check::<u8>(Err(missing("x"))), None);
        assert_eq!(agg.len(), 1);
    }

    #[tokio::test]
    async fn drain_reads_until_senders_drop() {
        let (tx, rx) = mpsc::unbounded_channel();
        let tx2 = tx.clone();
        tokio::spawn(async move {
            tx2.send(missing("late")).ok();
        });
        tx.send(missing("early")).ok();
        drop(tx);

        let mut agg = Aggregator::new();
        agg.drain(rx).await;
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn multi_error_renders_one_line_per_error() {
        let mut agg = Aggregator::new();
        agg.push(missing("g/a"));
        agg.push(SyncError::MissingParent {
            path: "d/x/p".into(),
            parent: "d/x".into(),
        });
        let err = agg.finish().unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("2 errors occurred:"));
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("g/a was not found on the source instance"));
    }

    #[test]
    fn fatal_classification() {
        assert!(SyncError::Probe(RemoteError::Network("down".into())).is_fatal());
        assert!(!missing("a").is_fatal());
    }
}
