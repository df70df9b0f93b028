use std::sync::Arc;

use tokio::task::JoinSet;

use crate::error::{Aggregator, SyncError};
use crate::remote::collect_pages;

use super::Fetcher;

impl Fetcher {
    /// List every group and every project, then keep what the filters match.
    ///
    /// Each listed item is matched and stored by its own task.
    pub(super) async fn fetch_small(self: &Arc<Self>) -> Result<Aggregator, SyncError> {
        let client = self.instance.client();
        let (groups, projects) = tokio::join!(
            collect_pages(|page| client.list_groups(page)),
            collect_pages(|page| client.list_projects(page)),
        );

        let listing = |what: &'static str| {
            let instance = self.instance.url().to_owned();
            move |source| SyncError::Listing {
                what,
                instance,
                source,
            }
        };
        let groups = groups.map_err(listing("groups"))?;
        let projects = projects.map_err(listing("projects"))?;

        tracing::debug!(
            url = self.instance.url(),
            groups = groups.len(),
            projects = projects.len(),
            "listed instance"
        );

        let mut tasks = JoinSet::new();
        for group in groups {
            let this = Arc::clone(self);
            tasks.spawn(async move { this.keep_group(group).map(drop) });
        }
        for project in projects {
            let this = Arc::clone(self);
            tasks.spawn(async move { this.keep_project(project).map(drop) });
        }

        let mut errors = Aggregator::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => errors.push(result.err()),
                Err(join_error) => errors.push(SyncError::from(join_error)),
            }
        }
        Ok(errors)
    }
}
