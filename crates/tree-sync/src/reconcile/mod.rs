//! Bringing the destination in line with the source.
//!
//! Groups are handled first and one at a time, in ascending order of
//! destination path: a parent path sorts before every path extending it,
//! so parents always exist (with a known id) before their children are
//! created. Projects never depend on each other and are reconciled
//! concurrently afterwards.
//!
//! Every create is preceded by an existence check against the destination
//! cache and every update only sends the fields that differ, so a rerun
//! against a synced destination performs reads only.

mod content;
mod groups;
mod projects;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::{Aggregator, SyncError};
use crate::git::{Credentials, GitTransport};
use crate::instance::Instance;
use crate::mapping::Mapping;
use crate::mirror::MirrorEngine;
use crate::model::{GroupRecord, Key, ProjectRecord, Scale};
use crate::path;

/// What happened to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Created,
    Patched { fields: usize },
    Unchanged,
}

/// Per-kind counts of reconciliation outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub created: usize,
    pub patched: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl Tally {
    fn record(&mut self, outcome: &Result<Reconciliation, SyncError>) {
        match outcome {
            Ok(Reconciliation::Created) => self.created += 1,
            Ok(Reconciliation::Patched { .. }) => self.patched += 1,
            Ok(Reconciliation::Unchanged) => self.unchanged += 1,
            Err(_) => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub groups: Tally,
    pub projects: Tally,
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Configure native pull mirrors instead of pushing with git.
    pub pull_mirror_available: bool,
    /// Ceiling on concurrently reconciled projects.
    pub concurrency: usize,
    /// Parent directory for temporary clones.
    pub scratch_dir: Option<PathBuf>,
    pub source_credentials: Credentials,
    pub destination_credentials: Credentials,
}

/// Drives destination state towards source state for every mapped path.
pub struct Reconciler {
    source: Arc<Instance>,
    destination: Arc<Instance>,
    mapping: Arc<Mapping>,
    mirror: MirrorEngine,
    options: ReconcileOptions,
    permits: Semaphore,
}

impl Reconciler {
    /// Both instances must already be fetched and `mapping` extended.
    pub fn new(
        source: Arc<Instance>,
        destination: Arc<Instance>,
        mapping: Arc<Mapping>,
        git: Arc<dyn GitTransport>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            mirror: MirrorEngine::new(git, options.scratch_dir.clone()),
            permits: Semaphore::new(options.concurrency.max(1)),
            source,
            destination,
            mapping,
            options,
        }
    }

    /// Reconcile groups, then projects. Every independent unit is attempted;
    /// failures are returned alongside the summary rather than stopping
    /// the run.
    pub async fn run(self: &Arc<Self>) -> (ReconcileSummary, Aggregator) {
        let mut summary = ReconcileSummary::default();
        let mut errors = Aggregator::new();

        self.reconcile_groups(&mut summary.groups, &mut errors).await;
        self.reconcile_projects(&mut summary.projects, &mut errors)
            .await;

        tracing::info!(
            groups_created = summary.groups.created,
            groups_patched = summary.groups.patched,
            projects_created = summary.projects.created,
            projects_patched = summary.projects.patched,
            errors = errors.len(),
            "reconcile finished"
        );
        (summary, errors)
    }

    async fn permit(&self) -> Option<SemaphorePermit<'_>> {
        self.permits.acquire().await.ok()
    }

    /// Id of the destination group `destination_path` is created in;
    /// `None` for a root-level path.
    fn parent_id(&self, destination_path: &str) -> Result<Option<u64>, SyncError> {
        let Some(parent) = path::dirname(destination_path) else {
            return Ok(None);
        };
        self.destination
            .group(parent)
            .map(|group| Some(group.id))
            .ok_or_else(|| SyncError::MissingParent {
                path: destination_path.to_owned(),
                parent: parent.to_owned(),
            })
    }

    /// Destination group at `destination_path`, from the cache or, on a big
    /// instance, by direct lookup: its walk only visits mapped paths, not
    /// descendants derived during the source fetch.
    async fn existing_group(&self, destination_path: &str) -> Result<Option<GroupRecord>, SyncError> {
        if let Some(cached) = self.destination.group(destination_path) {
            return Ok(Some(cached));
        }
        if self.destination.scale() != Scale::Big {
            return Ok(None);
        }
        match self
            .destination
            .client()
            .get_group(&Key::path(destination_path))
            .await
        {
            Ok(record) => {
                self.destination.put_group(record.clone());
                Ok(Some(record))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(SyncError::remote("look up group", destination_path, e)),
        }
    }

    /// Project counterpart of [`Reconciler::existing_group`].
    async fn existing_project(
        &self,
        destination_path: &str,
    ) -> Result<Option<ProjectRecord>, SyncError> {
        if let Some(cached) = self.destination.project(destination_path) {
            return Ok(Some(cached));
        }
        if self.destination.scale() != Scale::Big {
            return Ok(None);
        }
        match self
            .destination
            .client()
            .get_project(&Key::path(destination_path))
            .await
        {
            Ok(record) => {
                self.destination.put_project(record.clone());
                Ok(Some(record))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(SyncError::remote("look up project", destination_path, e)),
        }
    }
}
