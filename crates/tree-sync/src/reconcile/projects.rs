use std::sync::Arc;

use tokio::task::JoinSet;

use crate::error::{Aggregator, SyncError};
use crate::mapping::MappingEntry;
use crate::mirror::{MirrorJob, branch_name};
use crate::model::{Key, ProjectRecord, ResourceKind};
use crate::path;
use crate::remote::{NewProject, ProjectPatch, PullMirror};

use super::{Reconciler, Reconciliation, Tally};

/// Result of reconciling one project: the outcome for the project itself,
/// plus failures of the independent steps that followed it.
struct ProjectReport {
    outcome: Result<Reconciliation, SyncError>,
    side_errors: Vec<SyncError>,
}

impl Reconciler {
    pub(super) async fn reconcile_projects(
        self: &Arc<Self>,
        tally: &mut Tally,
        errors: &mut Aggregator,
    ) {
        let mut tasks = JoinSet::new();
        for (source_path, entry) in self.mapping.projects() {
            let this = Arc::clone(self);
            tasks.spawn(async move { this.reconcile_project(&source_path, &entry).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    tally.record(&report.outcome);
                    errors.check(report.outcome);
                    errors.extend(report.side_errors);
                }
                Err(e) => {
                    tally.failed += 1;
                    errors.push(SyncError::from(e));
                }
            }
        }
    }

    async fn reconcile_project(&self, source_path: &str, entry: &MappingEntry) -> ProjectReport {
        let _permit = self.permit().await;

        let (source, destination, outcome) = match self.ensure_project(source_path, entry).await {
            Ok(found) => found,
            Err(e) => {
                return ProjectReport {
                    outcome: Err(e),
                    side_errors: Vec::new(),
                };
            }
        };

        let mut side_errors = Vec::new();
        let destination = match self.transfer_repository(&source, entry, &destination).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                side_errors.push(e);
                destination
            }
        };

        let steps = [
            self.copy_avatar(
                ResourceKind::Project,
                (source.id, source.avatar_url.as_deref()),
                (destination.id, destination.avatar_url.as_deref()),
                &destination.full_path,
            )
            .await,
            if entry.options.releases {
                self.mirror_releases(&source, &destination).await
            } else {
                Ok(())
            },
            if entry.options.issues {
                self.mirror_issues(&source, &destination).await
            } else {
                Ok(())
            },
            if entry.options.ci_catalog {
                self.register_catalog(&destination).await
            } else {
                Ok(())
            },
        ];
        side_errors.extend(steps.into_iter().filter_map(Result::err));

        ProjectReport {
            outcome: Ok(outcome),
            side_errors,
        }
    }

    /// Make sure the destination project exists with the source's
    /// metadata, creating or patching it as needed.
    async fn ensure_project(
        &self,
        source_path: &str,
        entry: &MappingEntry,
    ) -> Result<(ProjectRecord, ProjectRecord, Reconciliation), SyncError> {
        let source = self
            .source
            .project(source_path)
            .ok_or_else(|| SyncError::MissingSource {
                path: source_path.to_owned(),
            })?;
        let target = entry.destination_path.as_str();
        let client = self.destination.client();

        if let Some(existing) = self.existing_project(target).await? {
            let patch = project_patch(&source, entry, &existing);
            if patch.is_empty() {
                return Ok((source, existing, Reconciliation::Unchanged));
            }
            let updated = client
                .update_project(existing.id, &patch)
                .await
                .map_err(|e| SyncError::remote("update project", target, e))?;
            tracing::info!(path = target, fields = patch.len(), "patched project");
            self.destination.put_project(updated.clone());
            return Ok((
                source,
                updated,
                Reconciliation::Patched {
                    fields: patch.len(),
                },
            ));
        }

        let spec = NewProject {
            name: source.name.clone(),
            path: path::basename(target).to_owned(),
            namespace_id: self.parent_id(target)?,
            description: source.description.clone(),
            visibility: entry
                .options
                .visibility_override()
                .unwrap_or(source.visibility),
            topics: source.topics.clone(),
        };
        let created = client
            .create_project(&spec)
            .await
            .map_err(|e| SyncError::remote("create project", target, e))?;
        tracing::info!(path = target, id = created.id, "created project");
        self.destination.put_project(created.clone());
        Ok((source, created, Reconciliation::Created))
    }

    /// Move repository content: a native pull mirror when the destination
    /// supports it, otherwise a git-level push. Returns the destination
    /// record as it stands afterwards.
    async fn transfer_repository(
        &self,
        source: &ProjectRecord,
        entry: &MappingEntry,
        destination: &ProjectRecord,
    ) -> Result<ProjectRecord, SyncError> {
        if self.options.pull_mirror_available {
            self.configure_pull_mirror(source, entry, destination).await?;
            Ok(destination.clone())
        } else {
            self.push_mirror(source, destination).await
        }
    }

    async fn configure_pull_mirror(
        &self,
        source: &ProjectRecord,
        entry: &MappingEntry,
        destination: &ProjectRecord,
    ) -> Result<(), SyncError> {
        let trigger_builds = entry.options.mirror_trigger_builds;
        if destination.mirror && destination.mirror_trigger_builds == trigger_builds {
            return Ok(());
        }

        let credentials = &self.options.source_credentials;
        let spec = PullMirror {
            url: source.http_url.clone(),
            auth_user: credentials.username.clone(),
            auth_password: credentials.token.clone(),
            trigger_builds,
            overwrite_diverged_branches: true,
        };
        self.destination
            .client()
            .configure_pull_mirror(destination.id, &spec)
            .await
            .map_err(|e| SyncError::remote("configure pull mirror for", &destination.full_path, e))?;

        tracing::info!(path = %destination.full_path, trigger_builds, "configured pull mirror");
        Ok(())
    }

    async fn push_mirror(
        &self,
        source: &ProjectRecord,
        destination: &ProjectRecord,
    ) -> Result<ProjectRecord, SyncError> {
        let job = MirrorJob {
            source_url: source.http_url.clone(),
            source_credentials: self.options.source_credentials.clone(),
            destination_url: destination.http_url.clone(),
            destination_credentials: self.options.destination_credentials.clone(),
        };
        let head = self
            .mirror
            .mirror(job)
            .await
            .map_err(|e| SyncError::Git {
                path: destination.full_path.clone(),
                source: e,
            })?;
        tracing::info!(path = %destination.full_path, %head, "pushed repository");

        self.repair_default_branch(destination, branch_name(&head)).await
    }

    /// Point the destination's default branch at the source's HEAD branch.
    /// The record is re-read first, as the push may have changed it.
    async fn repair_default_branch(
        &self,
        destination: &ProjectRecord,
        branch: &str,
    ) -> Result<ProjectRecord, SyncError> {
        let client = self.destination.client();
        let label = destination.full_path.as_str();

        let current = client
            .get_project(&Key::Id(destination.id))
            .await
            .map_err(|e| SyncError::remote("refresh project", label, e))?;
        if current.default_branch.as_deref() == Some(branch) {
            self.destination.put_project(current.clone());
            return Ok(current);
        }

        let patch = ProjectPatch {
            default_branch: Some(branch.to_owned()),
            ..ProjectPatch::default()
        };
        let updated = client
            .update_project(destination.id, &patch)
            .await
            .map_err(|e| SyncError::remote("set default branch of", label, e))?;
        tracing::info!(path = label, branch, "set default branch");
        self.destination.put_project(updated.clone());
        Ok(updated)
    }
}

/// Fields of `existing` that differ from what `source` and `entry` ask for.
/// The default branch is only compared once the destination has one.
pub(super) fn project_patch(
    source: &ProjectRecord,
    entry: &MappingEntry,
    existing: &ProjectRecord,
) -> ProjectPatch {
    let visibility = entry
        .options
        .visibility_override()
        .unwrap_or(source.visibility);
    let default_branch = match (&source.default_branch, &existing.default_branch) {
        (Some(wanted), Some(current)) if wanted != current => Some(wanted.clone()),
        _ => None,
    };

    ProjectPatch {
        name: (existing.name != source.name).then(|| source.name.clone()),
        description: (existing.description != source.description)
            .then(|| source.description.clone()),
        visibility: (existing.visibility != visibility).then_some(visibility),
        default_branch,
        topics: (existing.topics != source.topics).then(|| source.topics.clone()),
    }
}
