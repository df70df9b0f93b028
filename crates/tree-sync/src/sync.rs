//! One complete run: discover both instances, decide the mirror strategy,
//! reconcile.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Aggregator, MultiError, SyncError};
use crate::fetch::{self, DEFAULT_CONCURRENCY, FetchOptions};
use crate::filter::PathFilters;
use crate::git::{Credentials, GitTransport};
use crate::instance::Instance;
use crate::mapping::Mapping;
use crate::probe::{self, MirrorOverride};
use crate::reconcile::{ReconcileOptions, ReconcileSummary, Reconciler};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Ceiling on concurrent remote calls during fetch and on projects
    /// reconciled at once.
    pub concurrency: usize,
    pub mirror_override: MirrorOverride,
    pub scratch_dir: Option<PathBuf>,
    pub source_credentials: Credentials,
    pub destination_credentials: Credentials,
}

impl SyncOptions {
    pub fn new(source_credentials: Credentials, destination_credentials: Credentials) -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            mirror_override: MirrorOverride::default(),
            scratch_dir: None,
            source_credentials,
            destination_credentials,
        }
    }
}

/// Outcome of a run that got as far as reconciling.
#[derive(Debug)]
pub struct SyncReport {
    pub summary: ReconcileSummary,
    pub pull_mirror: bool,
    /// Every unit failure from fetch and reconcile, in arrival order.
    pub errors: Aggregator,
}

impl SyncReport {
    /// The summary if nothing failed, otherwise every failure.
    pub fn into_result(self) -> Result<ReconcileSummary, MultiError> {
        self.errors.finish().map(|()| self.summary)
    }
}

/// Run a full sync of `mapping` from `source` to `destination`.
///
/// Returns `Err` only for run-level failures (a failed bulk listing or
/// capability probe). Everything else is attempted and reported through
/// [`SyncReport::errors`].
pub async fn run(
    source: Arc<Instance>,
    destination: Arc<Instance>,
    mapping: Arc<Mapping>,
    git: Arc<dyn GitTransport>,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
    let filters = Arc::new(PathFilters::compile(&mapping));
    let fetch_options = FetchOptions {
        concurrency: options.concurrency,
    };

    tracing::info!(
        groups = mapping.group_count(),
        projects = mapping.project_count(),
        "starting sync"
    );

    let (pull_mirror, source_errors, destination_errors) = tokio::join!(
        probe::pull_mirror_available(destination.client(), options.mirror_override),
        fetch::fetch(
            Arc::clone(&source),
            Arc::clone(&mapping),
            Arc::clone(&filters),
            &fetch_options,
        ),
        fetch::fetch(
            Arc::clone(&destination),
            Arc::clone(&mapping),
            Arc::clone(&filters),
            &fetch_options,
        ),
    );
    let pull_mirror = pull_mirror?;
    let mut errors = source_errors?;
    errors.extend(destination_errors?);

    let reconciler = Arc::new(Reconciler::new(
        source,
        destination,
        mapping,
        git,
        ReconcileOptions {
            pull_mirror_available: pull_mirror,
            concurrency: options.concurrency,
            scratch_dir: options.scratch_dir.clone(),
            source_credentials: options.source_credentials.clone(),
            destination_credentials: options.destination_credentials.clone(),
        },
    ));
    let (summary, reconcile_errors) = reconciler.run().await;
    errors.extend(reconcile_errors);

    if !errors.is_empty() {
        tracing::warn!(errors = errors.len(), "sync finished with errors");
    }
    Ok(SyncReport {
        summary,
        pull_mirror,
        errors,
    })
}
