use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::model::{ResourceKind, Visibility};
use crate::path;

/// Per-resource copy options declared by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CopyOptions {
    /// Register the destination project as a CI/CD catalog resource.
    #[serde(default)]
    pub ci_catalog: bool,
    #[serde(default)]
    pub issues: bool,
    #[serde(default)]
    pub releases: bool,
    /// Let mirror updates trigger pipelines on the destination.
    #[serde(default)]
    pub mirror_trigger_builds: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
}

impl CopyOptions {
    /// The visibility override, if any. Unknown values resolve to public.
    pub fn visibility_override(&self) -> Option<Visibility> {
        self.visibility.as_deref().map(Visibility::parse_or_public)
    }
}

/// Where one source resource goes, and what comes along with it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MappingEntry {
    pub destination_path: String,
    #[serde(flatten)]
    pub options: CopyOptions,
}

impl MappingEntry {
    pub fn new(destination_path: impl Into<String>) -> Self {
        Self {
            destination_path: destination_path.into(),
            options: CopyOptions::default(),
        }
    }

    /// Entry for `discovered`, a descendant of the group this entry maps
    /// from `ancestor_source`. Options are inherited.
    pub fn derive(&self, ancestor_source: &str, discovered: &str) -> Option<Self> {
        let rest = path::relative(ancestor_source, discovered)?;
        Some(Self {
            destination_path: path::join(&self.destination_path, rest),
            options: self.options.clone(),
        })
    }
}

/// The operator-supplied mapping document, as parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MappingFile {
    #[serde(default)]
    pub groups: BTreeMap<String, MappingEntry>,
    #[serde(default)]
    pub projects: BTreeMap<String, MappingEntry>,
}

/// Result of adding an entry to a [`Mapping`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    Added,
    /// The source path already has an entry; the existing one stays.
    AlreadyMapped,
    /// Another source already maps onto the same destination path.
    DestinationTaken { by: String },
}

#[derive(Debug, Default)]
struct Tables {
    groups: HashMap<String, MappingEntry>,
    projects: HashMap<String, MappingEntry>,
    /// Destination path to the source path that claimed it, across both
    /// kinds.
    destinations: HashMap<String, String>,
}

impl Tables {
    fn insert(&mut self, kind: ResourceKind, source: String, entry: MappingEntry) -> Insertion {
        let table = match kind {
            ResourceKind::Group => &self.groups,
            ResourceKind::Project => &self.projects,
        };
        if table.contains_key(&source) {
            return Insertion::AlreadyMapped;
        }
        if let Some(by) = self.destinations.get(&entry.destination_path) {
            return Insertion::DestinationTaken { by: by.clone() };
        }

        self.destinations
            .insert(entry.destination_path.clone(), source.clone());
        match kind {
            ResourceKind::Group => self.groups.insert(source, entry),
            ResourceKind::Project => self.projects.insert(source, entry),
        };
        Insertion::Added
    }

    fn table(&self, kind: ResourceKind) -> &HashMap<String, MappingEntry> {
        match kind {
            ResourceKind::Group => &self.groups,
            ResourceKind::Project => &self.projects,
        }
    }
}

/// Source path to mapping entry tables for groups and projects.
///
/// Starts from the operator's entries and grows during fetch as
/// descendants of mapped groups are discovered. All access is lock-guarded
/// so fetch units can extend it concurrently. No two entries share a
/// destination path.
#[derive(Debug, Default)]
pub struct Mapping {
    tables: RwLock<Tables>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the operator's entries. Groups are added before projects; an
    /// entry whose destination is already taken is dropped with a warning.
    pub fn from_file(file: MappingFile) -> Self {
        let mut tables = Tables::default();
        let entries = file
            .groups
            .into_iter()
            .map(|(source, entry)| (ResourceKind::Group, source, entry))
            .chain(
                file.projects
                    .into_iter()
                    .map(|(source, entry)| (ResourceKind::Project, source, entry)),
            );
        for (kind, source, entry) in entries {
            let destination = entry.destination_path.clone();
            if let Insertion::DestinationTaken { by } = tables.insert(kind, source.clone(), entry) {
                tracing::warn!(%kind, %source, %destination, %by, "destination already mapped, entry ignored");
            }
        }
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Insert a group entry unless its source or destination path is
    /// already mapped.
    pub fn add_group(&self, source: impl Into<String>, entry: MappingEntry) -> Insertion {
        self.write().insert(ResourceKind::Group, source.into(), entry)
    }

    pub fn add_project(&self, source: impl Into<String>, entry: MappingEntry) -> Insertion {
        self.write()
            .insert(ResourceKind::Project, source.into(), entry)
    }

    pub fn group(&self, source: &str) -> Option<MappingEntry> {
        self.read().groups.get(source).cloned()
    }

    pub fn project(&self, source: &str) -> Option<MappingEntry> {
        self.read().projects.get(source).cloned()
    }

    /// Snapshot of every group entry, sorted by source path.
    pub fn groups(&self) -> Vec<(String, MappingEntry)> {
        self.snapshot(ResourceKind::Group)
    }

    /// Snapshot of every project entry, sorted by source path.
    pub fn projects(&self) -> Vec<(String, MappingEntry)> {
        self.snapshot(ResourceKind::Project)
    }

    pub fn group_count(&self) -> usize {
        self.read().groups.len()
    }

    pub fn project_count(&self) -> usize {
        self.read().projects.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, kind: ResourceKind) -> Vec<(String, MappingEntry)> {
        let mut entries: Vec<(String, MappingEntry)> = self
            .read()
            .table(kind)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn derive_joins_relative_path_onto_destination() {
        let entry = MappingEntry::new("d1");
        let derived = entry.derive("g1", "g1/sub/proj").unwrap();
        assert_eq!(derived.destination_path, "d1/sub/proj");
    }

    #[test]
    fn derive_inherits_options() {
        let mut entry = MappingEntry::new("d1");
        entry.options.issues = true;
        entry.options.visibility = Some("internal".into());

        let derived = entry.derive("g1", "g1/proj").unwrap();
        assert!(derived.options.issues);
        assert_eq!(derived.options.visibility.as_deref(), Some("internal"));
    }

    #[test]
    fn derive_rejects_unrelated_path() {
        let entry = MappingEntry::new("d1");
        assert!(entry.derive("g1", "g10/proj").is_none());
    }

    #[test]
    fn add_keeps_first_entry() {
        let mapping = Mapping::new();
        assert_eq!(mapping.add_project("g/p", MappingEntry::new("x/p")), Insertion::Added);
        assert_eq!(
            mapping.add_project("g/p", MappingEntry::new("y/p")),
            Insertion::AlreadyMapped
        );
        assert_eq!(mapping.project("g/p").unwrap().destination_path, "x/p");
    }

    #[test]
    fn destination_is_claimed_once_across_kinds() {
        let mapping = Mapping::new();
        mapping.add_group("g", MappingEntry::new("d/g"));

        assert_eq!(
            mapping.add_project("x/g", MappingEntry::new("d/g")),
            Insertion::DestinationTaken { by: "g".into() }
        );
        assert_eq!(
            mapping.add_group("h/g", MappingEntry::new("d/g")),
            Insertion::DestinationTaken { by: "g".into() }
        );
        assert!(mapping.project("x/g").is_none());
        assert_eq!(mapping.group_count(), 1);
    }

    #[test]
    fn file_entries_claim_destinations_first() {
        let file: MappingFile = serde_json::from_str(
            r#"{
                "groups": {"g1": {"destination_path": "d1"}},
                "projects": {
                    "x/p": {"destination_path": "d1/p"},
                    "y/p": {"destination_path": "d1/p"}
                }
            }"#,
        )
        .unwrap();
        let mapping = Mapping::from_file(file);

        assert_eq!(mapping.project_count(), 1);
        assert!(mapping.project("x/p").is_some());
        assert_eq!(
            mapping.add_project("g1/p", MappingEntry::new("d1/p")),
            Insertion::DestinationTaken { by: "x/p".into() }
        );
    }

    #[test]
    fn parses_mapping_document() {
        let json = r#"{
            "projects": {
                "g/p": { "destination_path": "g2/p", "visibility": "public", "issues": true }
            },
            "groups": {
                "team": { "destination_path": "mirror/team", "ci_catalog": true }
            }
        }"#;
        let file: MappingFile = serde_json::from_str(json).unwrap();
        let project = &file.projects["g/p"];
        assert_eq!(project.destination_path, "g2/p");
        assert_eq!(project.options.visibility_override(), Some(Visibility::Public));
        assert!(project.options.issues);
        assert!(!project.options.releases);
        assert!(file.groups["team"].options.ci_catalog);
    }

    #[test]
    fn concurrent_additions_are_all_kept() {
        let mapping = Arc::new(Mapping::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let mapping = Arc::clone(&mapping);
                std::thread::spawn(move || {
                    mapping.add_project(format!("g/p{i}"), MappingEntry::new(format!("d/p{i}")));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(mapping.project_count(), 16);
    }
}
