use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::mapping::Mapping;
use crate::model::Role;
use crate::path;

/// How a discovered path relates to the compiled filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatch {
    /// The path itself is mapped.
    Exact,
    /// The path lies beneath the mapped group `ancestor`.
    Descendant { ancestor: String },
    /// Not of interest.
    Unmatched,
}

/// Lookup sets compiled from the operator's mapping.
///
/// Destination group prefixes also hold every ancestor directory of every
/// destination path, so namespaces that only exist implicitly are still
/// recognised on the destination side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathFilters {
    pub source_projects: HashSet<String>,
    pub source_groups: HashSet<String>,
    pub destination_projects: HashSet<String>,
    pub destination_groups: HashSet<String>,
}

impl PathFilters {
    /// Compile the filters from the operator-declared entries.
    ///
    /// Groups and projects are compiled on separate threads; only the
    /// destination group set is shared between them.
    pub fn compile(mapping: &Mapping) -> Self {
        let groups = mapping.groups();
        let projects = mapping.projects();
        let destination_groups = Mutex::new(HashSet::new());

        let (source_groups, (source_projects, destination_projects)) =
            std::thread::scope(|scope| {
                let group_half = scope.spawn(|| {
                    let mut sources = HashSet::with_capacity(groups.len());
                    for (source, entry) in &groups {
                        sources.insert(source.clone());
                        let mut shared = destination_groups
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner);
                        shared.insert(entry.destination_path.clone());
                        shared.extend(path::ancestors(&entry.destination_path).map(str::to_owned));
                    }
                    sources
                });

                let project_half = scope.spawn(|| {
                    let mut sources = HashSet::with_capacity(projects.len());
                    let mut destinations = HashSet::with_capacity(projects.len());
                    for (source, entry) in &projects {
                        sources.insert(source.clone());
                        destinations.insert(entry.destination_path.clone());
                        let mut shared = destination_groups
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner);
                        shared.extend(path::ancestors(&entry.destination_path).map(str::to_owned));
                    }
                    (sources, destinations)
                });

                (join_half(group_half), join_half(project_half))
            });

        Self {
            source_projects,
            source_groups,
            destination_projects,
            destination_groups: destination_groups
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn projects(&self, role: Role) -> &HashSet<String> {
        match role {
            Role::Source => &self.source_projects,
            Role::Destination => &self.destination_projects,
        }
    }

    pub fn groups(&self, role: Role) -> &HashSet<String> {
        match role {
            Role::Source => &self.source_groups,
            Role::Destination => &self.destination_groups,
        }
    }

    /// Group paths with no other filtered group above them, sorted.
    pub fn top_level_groups(&self, role: Role) -> Vec<String> {
        let groups = self.groups(role);
        let mut roots: Vec<String> = groups
            .iter()
            .filter(|g| !path::ancestors(g).any(|a| groups.contains(a)))
            .cloned()
            .collect();
        roots.sort();
        roots
    }

    pub fn match_project(&self, role: Role, full_path: &str) -> PathMatch {
        if self.projects(role).contains(full_path) {
            return PathMatch::Exact;
        }
        self.match_descendant(role, full_path)
    }

    pub fn match_group(&self, role: Role, full_path: &str) -> PathMatch {
        if self.groups(role).contains(full_path) {
            return PathMatch::Exact;
        }
        self.match_descendant(role, full_path)
    }

    /// The nearest filtered group above `full_path` wins.
    fn match_descendant(&self, role: Role, full_path: &str) -> PathMatch {
        let groups = self.groups(role);
        path::ancestors(full_path)
            .find(|a| groups.contains(*a))
            .map(|ancestor| PathMatch::Descendant {
                ancestor: ancestor.to_owned(),
            })
            .unwrap_or(PathMatch::Unmatched)
    }
}

fn join_half<T>(handle: std::thread::ScopedJoinHandle<'_, T>) -> T {
    match handle.join() {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

#[cfg(test)]
mod tests {
    use crate::mapping::{MappingEntry, MappingFile};

    use super::*;

    fn sample_mapping() -> Mapping {
        let mut file = MappingFile::default();
        file.groups
            .insert("team".into(), MappingEntry::new("mirror/team"));
        file.groups
            .insert("team/infra".into(), MappingEntry::new("mirror/team/infra"));
        file.projects
            .insert("g/p".into(), MappingEntry::new("g2/nested/p"));
        Mapping::from_file(file)
    }

    #[test]
    fn compiles_source_sets() {
        let filters = PathFilters::compile(&sample_mapping());
        assert!(filters.source_projects.contains("g/p"));
        assert!(filters.source_groups.contains("team"));
        assert!(filters.source_groups.contains("team/infra"));
        assert_eq!(filters.source_groups.len(), 2);
    }

    #[test]
    fn destination_groups_include_project_parents_and_ancestors() {
        let filters = PathFilters::compile(&sample_mapping());
        assert!(filters.destination_projects.contains("g2/nested/p"));
        assert!(filters.destination_groups.contains("g2/nested"));
        assert!(filters.destination_groups.contains("g2"));
        assert!(filters.destination_groups.contains("mirror/team"));
        assert!(filters.destination_groups.contains("mirror"));
    }

    #[test]
    fn top_level_groups_skip_nested_filters() {
        let filters = PathFilters::compile(&sample_mapping());
        assert_eq!(filters.top_level_groups(Role::Source), vec!["team".to_owned()]);
    }

    #[test]
    fn exact_project_match() {
        let filters = PathFilters::compile(&sample_mapping());
        assert_eq!(filters.match_project(Role::Source, "g/p"), PathMatch::Exact);
    }

    #[test]
    fn descendant_uses_nearest_group() {
        let filters = PathFilters::compile(&sample_mapping());
        assert_eq!(
            filters.match_project(Role::Source, "team/infra/tools/deploy"),
            PathMatch::Descendant {
                ancestor: "team/infra".into()
            }
        );
        assert_eq!(
            filters.match_group(Role::Source, "team/web"),
            PathMatch::Descendant {
                ancestor: "team".into()
            }
        );
    }

    #[test]
    fn shared_string_prefix_is_not_a_match() {
        let filters = PathFilters::compile(&sample_mapping());
        assert_eq!(
            filters.match_project(Role::Source, "teammates/p"),
            PathMatch::Unmatched
        );
    }

    #[test]
    fn empty_mapping_matches_nothing() {
        let filters = PathFilters::compile(&Mapping::new());
        assert_eq!(filters.match_group(Role::Destination, "a"), PathMatch::Unmatched);
        assert!(filters.top_level_groups(Role::Source).is_empty());
    }
}
