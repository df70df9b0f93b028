use std::collections::BTreeMap;

use crate::error::{Aggregator, SyncError};
use crate::mapping::MappingEntry;
use crate::model::{GroupRecord, ResourceKind, Visibility};
use crate::path;
use crate::remote::{GroupPatch, NewGroup};

use super::{Reconciler, Reconciliation, Tally};

/// The mapped group behind a destination group path, if any.
type GroupSource = Option<(String, MappingEntry)>;

impl Reconciler {
    pub(super) async fn reconcile_groups(&self, tally: &mut Tally, errors: &mut Aggregator) {
        let plan = self.plan_groups();
        let visibilities = self.mapped_visibilities();
        let mut avatars = Vec::new();

        // Sequential: a create may need the id of a group created earlier
        // in this loop.
        for (destination, source) in &plan {
            let outcome = self
                .reconcile_group(destination, source.as_ref(), &visibilities)
                .await;
            tally.record(&outcome);
            if outcome.is_ok()
                && let Some((source_path, _)) = source
            {
                avatars.push((source_path.as_str(), destination.as_str()));
            }
            errors.check(outcome);
        }

        let copies = avatars
            .into_iter()
            .map(|(source, destination)| self.copy_group_avatar(source, destination));
        errors.extend(
            futures::future::join_all(copies)
                .await
                .into_iter()
                .map(Result::err),
        );
    }

    /// Every destination group path the run needs, in ascending order:
    /// mapped groups plus every ancestor of any mapped destination path.
    fn plan_groups(&self) -> BTreeMap<String, GroupSource> {
        let mut plan: BTreeMap<String, GroupSource> = BTreeMap::new();
        let groups = self.mapping.groups();

        for (source, entry) in &groups {
            plan.insert(
                entry.destination_path.clone(),
                Some((source.clone(), entry.clone())),
            );
        }

        let destinations = groups
            .iter()
            .map(|(_, entry)| entry.destination_path.clone())
            .chain(
                self.mapping
                    .projects()
                    .into_iter()
                    .map(|(_, entry)| entry.destination_path),
            )
            .collect::<Vec<_>>();
        for destination in &destinations {
            for ancestor in path::ancestors(destination) {
                plan.entry(ancestor.to_owned()).or_insert(None);
            }
        }
        plan
    }

    async fn reconcile_group(
        &self,
        destination: &str,
        source: Option<&(String, MappingEntry)>,
        visibilities: &[(String, Visibility)],
    ) -> Result<Reconciliation, SyncError> {
        let mapped = match source {
            Some((source_path, entry)) => {
                let record = self
                    .source
                    .group(source_path)
                    .ok_or_else(|| SyncError::MissingSource {
                        path: source_path.clone(),
                    })?;
                Some((record, entry))
            }
            None => None,
        };
        let client = self.destination.client();

        if let Some(existing) = self.existing_group(destination).await? {
            let Some((record, entry)) = mapped else {
                return Ok(Reconciliation::Unchanged);
            };
            let patch = group_patch(&record, entry, &existing);
            if patch.is_empty() {
                return Ok(Reconciliation::Unchanged);
            }

            let updated = client
                .update_group(existing.id, &patch)
                .await
                .map_err(|e| SyncError::remote("update group", destination, e))?;
            tracing::info!(path = destination, fields = patch.len(), "patched group");
            self.destination.put_group(updated);
            return Ok(Reconciliation::Patched {
                fields: patch.len(),
            });
        }

        let parent_id = self.parent_id(destination)?;
        let leaf = path::basename(destination).to_owned();
        let spec = match mapped {
            Some((record, entry)) => NewGroup {
                name: record.name.clone(),
                path: leaf,
                parent_id,
                description: record.description.clone(),
                visibility: entry
                    .options
                    .visibility_override()
                    .unwrap_or(record.visibility),
            },
            None => NewGroup {
                name: leaf.clone(),
                path: leaf,
                parent_id,
                description: String::new(),
                visibility: implicit_visibility(destination, visibilities),
            },
        };

        let created = client
            .create_group(&spec)
            .await
            .map_err(|e| SyncError::remote("create group", destination, e))?;
        tracing::info!(path = destination, id = created.id, "created group");
        self.destination.put_group(created);
        Ok(Reconciliation::Created)
    }

    /// Destination path and effective visibility of every mapped resource
    /// the source still has.
    fn mapped_visibilities(&self) -> Vec<(String, Visibility)> {
        let groups = self.mapping.groups().into_iter().map(|(source, entry)| {
            let fallback = self.source.group(&source).map(|g| g.visibility);
            (entry, fallback)
        });
        let projects = self.mapping.projects().into_iter().map(|(source, entry)| {
            let fallback = self.source.project(&source).map(|p| p.visibility);
            (entry, fallback)
        });

        groups
            .chain(projects)
            .filter_map(|(entry, fallback)| {
                let visibility = entry.options.visibility_override().or(fallback)?;
                Some((entry.destination_path, visibility))
            })
            .collect()
    }

    async fn copy_group_avatar(&self, source: &str, destination: &str) -> Result<(), SyncError> {
        let (Some(from), Some(to)) = (self.source.group(source), self.destination.group(destination))
        else {
            return Ok(());
        };
        self.copy_avatar(
            ResourceKind::Group,
            (from.id, from.avatar_url.as_deref()),
            (to.id, to.avatar_url.as_deref()),
            destination,
        )
        .await
    }
}

/// Visibility for a group created only as a namespace: as visible as the
/// most visible mapped resource beneath it, so no child outranks its parent.
fn implicit_visibility(destination: &str, visibilities: &[(String, Visibility)]) -> Visibility {
    visibilities
        .iter()
        .filter(|(path, _)| path::is_under(path, destination))
        .map(|(_, visibility)| *visibility)
        .max()
        .unwrap_or(Visibility::Private)
}

/// Fields of `existing` that differ from what `source` and `entry` ask for.
pub(super) fn group_patch(
    source: &GroupRecord,
    entry: &MappingEntry,
    existing: &GroupRecord,
) -> GroupPatch {
    let visibility = entry
        .options
        .visibility_override()
        .unwrap_or(source.visibility);

    GroupPatch {
        name: (existing.name != source.name).then(|| source.name.clone()),
        description: (existing.description != source.description)
            .then(|| source.description.clone()),
        visibility: (existing.visibility != visibility).then_some(visibility),
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::group_record;

    use super::*;

    #[test]
    fn identical_groups_need_no_patch() {
        let source = group_record(1, "g");
        let mut existing = group_record(9, "d/g");
        existing.name = source.name.clone();
        assert!(group_patch(&source, &MappingEntry::new("d/g"), &existing).is_empty());
    }

    #[test]
    fn patch_carries_only_differing_fields() {
        let mut source = group_record(1, "g");
        source.description = "new words".into();
        let mut existing = group_record(9, "d/g");
        existing.name = source.name.clone();

        let patch = group_patch(&source, &MappingEntry::new("d/g"), &existing);
        assert_eq!(patch.description.as_deref(), Some("new words"));
        assert_eq!(patch.name, None);
        assert_eq!(patch.visibility, None);
    }

    #[test]
    fn visibility_override_wins_over_source() {
        let source = group_record(1, "g");
        let mut existing = group_record(9, "d/g");
        existing.name = source.name.clone();
        let mut entry = MappingEntry::new("d/g");
        entry.options.visibility = Some("internal".into());

        let patch = group_patch(&source, &entry, &existing);
        assert_eq!(patch.visibility, Some(Visibility::Internal));
    }

    #[test]
    fn namespace_takes_the_most_visible_resource_beneath_it() {
        let visibilities = vec![
            ("d/a/p".to_owned(), Visibility::Internal),
            ("d/b".to_owned(), Visibility::Private),
            ("d2/p".to_owned(), Visibility::Public),
            ("dx/q".to_owned(), Visibility::Public),
        ];

        assert_eq!(implicit_visibility("d", &visibilities), Visibility::Internal);
        assert_eq!(implicit_visibility("d/a", &visibilities), Visibility::Internal);
        assert_eq!(implicit_visibility("d2", &visibilities), Visibility::Public);
        assert_eq!(implicit_visibility("empty", &visibilities), Visibility::Private);
    }
}
