//! Discovery of groups and projects on one instance.
//!
//! Two strategies populate an [`Instance`] cache, picked by its
//! [`Scale`]: small instances are listed in bulk and filtered locally, big
//! ones are fetched entry by entry with a recursive walk below each mapped
//! group. On the source side, every resource found beneath a mapped group
//! gets its own derived [`MappingEntry`].

mod big;
mod small;

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::{Aggregator, SyncError};
use crate::filter::{PathFilters, PathMatch};
use crate::instance::Instance;
use crate::mapping::{Insertion, Mapping, MappingEntry};
use crate::model::{GroupRecord, ProjectRecord, ResourceKind, Role, Scale};

pub use big::GroupRef;

/// Default number of remote calls a fetch keeps in flight.
pub const DEFAULT_CONCURRENCY: usize = 16;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Ceiling on concurrent remote calls. Spawning is never throttled.
    pub concurrency: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Populate `instance` with every filtered group and project.
///
/// Per-entry failures are collected and returned; only a failed bulk
/// listing (small instances) aborts with `Err`.
pub async fn fetch(
    instance: Arc<Instance>,
    mapping: Arc<Mapping>,
    filters: Arc<PathFilters>,
    options: &FetchOptions,
) -> Result<Aggregator, SyncError> {
    let fetcher = Arc::new(Fetcher {
        instance,
        mapping,
        filters,
        permits: Semaphore::new(options.concurrency.max(1)),
    });

    tracing::info!(
        role = %fetcher.instance.role(),
        scale = %fetcher.instance.scale(),
        url = fetcher.instance.url(),
        "fetching"
    );

    let errors = match fetcher.instance.scale() {
        Scale::Small => fetcher.fetch_small().await?,
        Scale::Big => fetcher.fetch_big().await,
    };

    tracing::info!(
        role = %fetcher.instance.role(),
        groups = fetcher.instance.group_paths().len(),
        projects = fetcher.instance.project_paths().len(),
        errors = errors.len(),
        "fetch finished"
    );

    Ok(errors)
}

/// State shared by every concurrent unit of one fetch.
pub(crate) struct Fetcher {
    instance: Arc<Instance>,
    mapping: Arc<Mapping>,
    filters: Arc<PathFilters>,
    permits: Semaphore,
}

impl Fetcher {
    fn role(&self) -> Role {
        self.instance.role()
    }

    async fn permit(&self) -> Option<SemaphorePermit<'_>> {
        self.permits.acquire().await.ok()
    }

    /// Cache a group if the filters want it; returns false if discarded.
    fn keep_group(&self, record: GroupRecord) -> Result<bool, SyncError> {
        let matched = self.filters.match_group(self.role(), &record.full_path);
        if matched == PathMatch::Unmatched {
            return Ok(false);
        }

        let full_path = record.full_path.clone();
        self.instance.put_group(record);

        if let Some(entry) = self.derive_entry(&matched, &full_path)? {
            let destination = entry.destination_path.clone();
            let inserted = self.mapping.add_group(full_path.clone(), entry);
            derived(ResourceKind::Group, inserted, full_path, destination)?;
        }
        Ok(true)
    }

    /// Cache a project if the filters want it; returns false if discarded.
    fn keep_project(&self, record: ProjectRecord) -> Result<bool, SyncError> {
        let matched = self.filters.match_project(self.role(), &record.full_path);
        if matched == PathMatch::Unmatched {
            return Ok(false);
        }

        let full_path = record.full_path.clone();
        self.instance.put_project(record);

        if let Some(entry) = self.derive_entry(&matched, &full_path)? {
            let destination = entry.destination_path.clone();
            let inserted = self.mapping.add_project(full_path.clone(), entry);
            derived(ResourceKind::Project, inserted, full_path, destination)?;
        }
        Ok(true)
    }

    /// Mapping entry for a source resource matched through an ancestor.
    /// The destination side never extends the mapping.
    fn derive_entry(
        &self,
        matched: &PathMatch,
        full_path: &str,
    ) -> Result<Option<MappingEntry>, SyncError> {
        let PathMatch::Descendant { ancestor } = matched else {
            return Ok(None);
        };
        if self.role() != Role::Source {
            return Ok(None);
        }

        let missing = || SyncError::MissingMapping {
            group: ancestor.clone(),
            path: full_path.to_owned(),
        };
        let group_entry = self.mapping.group(ancestor).ok_or_else(missing)?;
        group_entry
            .derive(ancestor, full_path)
            .map(Some)
            .ok_or_else(missing)
    }
}

/// Outcome of adding a derived entry. A destination claimed by another
/// source is a unit error; the discovered resource is left unmapped.
fn derived(
    kind: ResourceKind,
    inserted: Insertion,
    source: String,
    destination: String,
) -> Result<(), SyncError> {
    match inserted {
        Insertion::Added => {
            tracing::debug!(%kind, path = %source, %destination, "mapped by ancestor");
            Ok(())
        }
        Insertion::AlreadyMapped => Ok(()),
        Insertion::DestinationTaken { by } => Err(SyncError::DestinationConflict {
            destination,
            first: by,
            second: source,
        }),
    }
}
