use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinSet;

use crate::error::{Aggregator, SyncError};
use crate::model::{GroupRecord, Key, Role};
use crate::remote::collect_pages;

use super::Fetcher;

/// A group to visit: either still to be looked up, or already in hand
/// from a listing (which saves a request).
#[derive(Debug, Clone)]
pub enum GroupRef {
    Lookup(Key),
    Resolved(GroupRecord),
}

impl GroupRef {
    fn label(&self) -> String {
        match self {
            Self::Lookup(key) => key.to_string(),
            Self::Resolved(record) => record.full_path.clone(),
        }
    }
}

impl Fetcher {
    /// Fetch filtered projects one by one and walk every filtered group.
    ///
    /// Every unit runs in one `JoinSet` owned here. A walk unit hands the
    /// subgroups it found back as its output, and they join the set before
    /// that unit is reaped, so the set only empties once the whole walk is
    /// done. Unit errors stream through the channel; panics surface as
    /// join errors.
    pub(super) async fn fetch_big(self: &Arc<Self>) -> Aggregator {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut units = JoinSet::new();

        let mut projects: Vec<String> = self.filters.projects(self.role()).iter().cloned().collect();
        projects.sort();
        for path in projects {
            let this = Arc::clone(self);
            let tx = tx.clone();
            units.spawn(async move {
                if let Err(error) = this.fetch_project(&path).await {
                    tx.send(error).ok();
                }
                Vec::new()
            });
        }

        // The destination only confirms the paths it needs; the source
        // walks down from the top of each mapped subtree.
        let roots = match self.role() {
            Role::Source => self.filters.top_level_groups(Role::Source),
            Role::Destination => {
                let mut all: Vec<String> =
                    self.filters.groups(Role::Destination).iter().cloned().collect();
                all.sort();
                all
            }
        };
        for root in roots {
            self.walk(&mut units, GroupRef::Lookup(Key::Path(root)), &tx);
        }

        let mut errors = Aggregator::new();
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(subgroups) => {
                    for subgroup in subgroups {
                        self.walk(&mut units, GroupRef::Resolved(subgroup), &tx);
                    }
                }
                Err(join_error) => errors.push(SyncError::from(join_error)),
            }
        }
        drop(tx);
        errors.drain(rx).await;
        errors
    }

    async fn fetch_project(&self, full_path: &str) -> Result<(), SyncError> {
        let _permit = self.permit().await;
        match self
            .instance
            .client()
            .get_project(&Key::path(full_path))
            .await
        {
            Ok(record) => self.keep_project(record).map(drop),
            Err(error) if error.is_not_found() && self.role() == Role::Destination => Ok(()),
            Err(error) => Err(SyncError::remote("fetch project", full_path, error)),
        }
    }

    /// Spawn one unit of the recursive group walk.
    fn walk(
        self: &Arc<Self>,
        units: &mut JoinSet<Vec<GroupRecord>>,
        group: GroupRef,
        tx: &UnboundedSender<SyncError>,
    ) {
        let this = Arc::clone(self);
        let tx = tx.clone();
        units.spawn(async move {
            match this.visit(group, &tx).await {
                Ok(subgroups) => subgroups,
                Err(error) => {
                    tx.send(error).ok();
                    Vec::new()
                }
            }
        });
    }

    /// Keep one group and, on the source, its direct projects. Returns the
    /// direct subgroups still to be walked.
    async fn visit(
        &self,
        group: GroupRef,
        tx: &UnboundedSender<SyncError>,
    ) -> Result<Vec<GroupRecord>, SyncError> {
        let Some(record) = self.resolve(group).await? else {
            return Ok(Vec::new());
        };
        let (id, full_path) = (record.id, record.full_path.clone());
        self.keep_group(record)?;

        if self.role() != Role::Source {
            return Ok(Vec::new());
        }

        let client = self.instance.client();
        let (projects, subgroups) = {
            let _permit = self.permit().await;
            tokio::join!(
                collect_pages(|page| client.list_group_projects(id, page)),
                collect_pages(|page| client.list_subgroups(id, page)),
            )
        };

        match projects {
            Ok(projects) => {
                for project in projects {
                    if let Err(error) = self.keep_project(project) {
                        tx.send(error).ok();
                    }
                }
            }
            Err(error) => {
                tx.send(SyncError::remote("list projects of", &full_path, error))
                    .ok();
            }
        }

        match subgroups {
            Ok(subgroups) => {
                tracing::debug!(path = %full_path, count = subgroups.len(), "descending");
                Ok(subgroups)
            }
            Err(error) => {
                tx.send(SyncError::remote("list subgroups of", &full_path, error))
                    .ok();
                Ok(Vec::new())
            }
        }
    }

    /// Look a group up unless it is already resolved. A group missing from
    /// the destination is simply absent.
    async fn resolve(&self, group: GroupRef) -> Result<Option<GroupRecord>, SyncError> {
        let key = match group {
            GroupRef::Resolved(record) => return Ok(Some(record)),
            GroupRef::Lookup(key) => key,
        };

        let _permit = self.permit().await;
        match self.instance.client().get_group(&key).await {
            Ok(record) => Ok(Some(record)),
            Err(error) if error.is_not_found() && self.role() == Role::Destination => Ok(None),
            Err(error) => Err(SyncError::remote(
                "fetch group",
                GroupRef::Lookup(key).label(),
                error,
            )),
        }
    }
}
