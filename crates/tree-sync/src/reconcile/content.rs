//! Per-project extras copied after the project itself is in place.

use std::collections::{HashMap, HashSet};

use crate::error::SyncError;
use crate::model::{Issue, ProjectRecord, ResourceKind};
use crate::remote::{NewIssue, collect_pages};

use super::Reconciler;

impl Reconciler {
    /// Copy an avatar when the source has one and the destination has none.
    /// Arguments are `(id, avatar_url)` pairs.
    pub(super) async fn copy_avatar(
        &self,
        kind: ResourceKind,
        (source_id, source_avatar): (u64, Option<&str>),
        (destination_id, destination_avatar): (u64, Option<&str>),
        label: &str,
    ) -> Result<(), SyncError> {
        if source_avatar.is_none() || destination_avatar.is_some() {
            return Ok(());
        }

        let avatar = self
            .source
            .client()
            .download_avatar(kind, source_id)
            .await
            .map_err(|e| SyncError::remote("download avatar for", label, e))?;
        self.destination
            .client()
            .upload_avatar(kind, destination_id, &avatar)
            .await
            .map_err(|e| SyncError::remote("upload avatar for", label, e))?;

        tracing::info!(%kind, path = label, "copied avatar");
        Ok(())
    }

    /// Create every source issue missing on the destination (matched by
    /// title) and close destination issues whose source counterpart is
    /// closed. Issues are created oldest first.
    pub(super) async fn mirror_issues(
        &self,
        source: &ProjectRecord,
        destination: &ProjectRecord,
    ) -> Result<(), SyncError> {
        let src = self.source.client();
        let dst = self.destination.client();
        let (theirs, ours) = tokio::join!(
            collect_pages(|page| src.list_issues(source.id, page)),
            collect_pages(|page| dst.list_issues(destination.id, page)),
        );
        let mut theirs = theirs.map_err(|e| SyncError::remote("list issues of", &source.full_path, e))?;
        let ours = ours.map_err(|e| SyncError::remote("list issues of", &destination.full_path, e))?;
        theirs.sort_by_key(|issue| issue.iid);

        let mirrored: HashMap<&str, &Issue> =
            ours.iter().map(|issue| (issue.title.as_str(), issue)).collect();
        let label = &destination.full_path;
        let mut created = 0usize;

        for issue in &theirs {
            let (iid, open) = match mirrored.get(issue.title.as_str()) {
                Some(existing) => (existing.iid, !existing.closed),
                None => {
                    let spec = NewIssue {
                        title: issue.title.clone(),
                        description: issue.description.clone(),
                        labels: issue.labels.clone(),
                    };
                    let new = dst
                        .create_issue(destination.id, &spec)
                        .await
                        .map_err(|e| SyncError::remote("create issue in", label, e))?;
                    created += 1;
                    (new.iid, true)
                }
            };
            if issue.closed && open {
                dst.close_issue(destination.id, iid)
                    .await
                    .map_err(|e| SyncError::remote("close issue in", label, e))?;
            }
        }

        if created > 0 {
            tracing::info!(path = %label, created, "mirrored issues");
        }
        Ok(())
    }

    /// Create every source release whose tag has no release on the
    /// destination yet. Releases are created oldest first.
    pub(super) async fn mirror_releases(
        &self,
        source: &ProjectRecord,
        destination: &ProjectRecord,
    ) -> Result<(), SyncError> {
        let src = self.source.client();
        let dst = self.destination.client();
        let (theirs, ours) = tokio::join!(
            collect_pages(|page| src.list_releases(source.id, page)),
            collect_pages(|page| dst.list_releases(destination.id, page)),
        );
        let theirs = theirs.map_err(|e| SyncError::remote("list releases of", &source.full_path, e))?;
        let ours = ours.map_err(|e| SyncError::remote("list releases of", &destination.full_path, e))?;

        let tags: HashSet<&str> = ours.iter().map(|r| r.tag_name.as_str()).collect();
        let missing: Vec<_> = theirs
            .iter()
            .rev()
            .filter(|release| !tags.contains(release.tag_name.as_str()))
            .collect();

        for release in &missing {
            dst.create_release(destination.id, release)
                .await
                .map_err(|e| SyncError::remote("create release in", &destination.full_path, e))?;
        }
        if !missing.is_empty() {
            tracing::info!(path = %destination.full_path, created = missing.len(), "mirrored releases");
        }
        Ok(())
    }

    pub(super) async fn register_catalog(&self, destination: &ProjectRecord) -> Result<(), SyncError> {
        let client = self.destination.client();
        let path = destination.full_path.as_str();
        let registered = client
            .is_catalog_resource(path)
            .await
            .map_err(|e| SyncError::remote("check CI catalog for", path, e))?;
        if registered {
            return Ok(());
        }

        client
            .add_to_catalog(path)
            .await
            .map_err(|e| SyncError::remote("add to CI catalog", path, e))?;
        tracing::info!(path, "registered CI catalog resource");
        Ok(())
    }
}
