use std::sync::Arc;

use tree_sync::fetch::{self, FetchOptions};
use tree_sync::test_support::InMemoryRemote;
use tree_sync::{Instance, Mapping, MappingEntry, PathFilters, Role, Scale, SyncError, Visibility};

fn seeded_source() -> Arc<InMemoryRemote> {
    let remote = Arc::new(InMemoryRemote::new("https://src"));
    remote.add_group("g1", Visibility::Public);
    remote.add_group("g1/sub", Visibility::Public);
    remote.add_project("g1/sub/proj", Visibility::Public);
    remote.add_project("g1/top", Visibility::Internal);
    remote.add_group("g10", Visibility::Public);
    remote.add_project("g10/unrelated", Visibility::Public);
    remote.add_group("other", Visibility::Private);
    remote.add_project("other/x", Visibility::Private);
    remote
}

fn group_mapping() -> Arc<Mapping> {
    let mapping = Mapping::new();
    mapping.add_group("g1", MappingEntry::new("d1"));
    Arc::new(mapping)
}

async fn fetch_source(
    remote: Arc<InMemoryRemote>,
    scale: Scale,
    mapping: Arc<Mapping>,
) -> (Arc<Instance>, Result<tree_sync::Aggregator, SyncError>) {
    let instance = Arc::new(Instance::new(Role::Source, scale, remote));
    let filters = Arc::new(PathFilters::compile(&mapping));
    let result = fetch::fetch(
        Arc::clone(&instance),
        mapping,
        filters,
        &FetchOptions::default(),
    )
    .await;
    (instance, result)
}

// -- small strategy --

#[tokio::test]
async fn small_fetch_derives_destinations_for_descendants() {
    let mapping = group_mapping();
    let (instance, result) = fetch_source(seeded_source(), Scale::Small, Arc::clone(&mapping)).await;

    assert!(result.unwrap().is_empty());
    assert_eq!(
        mapping.project("g1/sub/proj").unwrap().destination_path,
        "d1/sub/proj"
    );
    assert_eq!(mapping.group("g1/sub").unwrap().destination_path, "d1/sub");
    assert_eq!(mapping.project("g1/top").unwrap().destination_path, "d1/top");
    assert_eq!(
        instance.project_paths(),
        vec!["g1/sub/proj".to_owned(), "g1/top".to_owned()]
    );
}

#[tokio::test]
async fn small_fetch_respects_segment_boundaries() {
    let mapping = group_mapping();
    let (instance, _) = fetch_source(seeded_source(), Scale::Small, Arc::clone(&mapping)).await;

    assert!(instance.group("g10").is_none());
    assert!(mapping.project("g10/unrelated").is_none());
}

#[tokio::test]
async fn small_fetch_walks_every_page() {
    let remote = seeded_source();
    remote.set_page_size(1);
    let mapping = group_mapping();
    let (instance, result) = fetch_source(remote, Scale::Small, Arc::clone(&mapping)).await;

    assert!(result.unwrap().is_empty());
    assert_eq!(instance.group_paths(), vec!["g1".to_owned(), "g1/sub".to_owned()]);
    assert_eq!(mapping.project_count(), 2);
}

#[tokio::test]
async fn derived_entries_inherit_copy_options() {
    let mapping = Mapping::new();
    let mut entry = MappingEntry::new("d1");
    entry.options.issues = true;
    entry.options.visibility = Some("internal".into());
    mapping.add_group("g1", entry);
    let mapping = Arc::new(mapping);

    fetch_source(seeded_source(), Scale::Small, Arc::clone(&mapping)).await;

    let derived = mapping.project("g1/sub/proj").unwrap();
    assert!(derived.options.issues);
    assert_eq!(derived.options.visibility.as_deref(), Some("internal"));
}

#[tokio::test]
async fn explicit_entries_are_not_overwritten_by_derivation() {
    let mapping = Mapping::new();
    mapping.add_group("g1", MappingEntry::new("d1"));
    mapping.add_project("g1/sub/proj", MappingEntry::new("elsewhere/proj"));
    let mapping = Arc::new(mapping);

    fetch_source(seeded_source(), Scale::Small, Arc::clone(&mapping)).await;

    assert_eq!(
        mapping.project("g1/sub/proj").unwrap().destination_path,
        "elsewhere/proj"
    );
}

// -- big strategy --

#[tokio::test]
async fn big_fetch_walks_down_from_mapped_groups() {
    let mapping = group_mapping();
    let (instance, result) = fetch_source(seeded_source(), Scale::Big, Arc::clone(&mapping)).await;

    assert!(result.unwrap().is_empty());
    assert_eq!(instance.group_paths(), vec!["g1".to_owned(), "g1/sub".to_owned()]);
    assert_eq!(
        mapping.project("g1/sub/proj").unwrap().destination_path,
        "d1/sub/proj"
    );
    assert!(instance.project("other/x").is_none());
}

#[tokio::test]
async fn big_fetch_gets_explicit_projects_one_by_one() {
    let mapping = Mapping::new();
    mapping.add_project("other/x", MappingEntry::new("d/x"));
    let mapping = Arc::new(mapping);

    let (instance, result) = fetch_source(seeded_source(), Scale::Big, mapping).await;

    assert!(result.unwrap().is_empty());
    assert_eq!(instance.project_paths(), vec!["other/x".to_owned()]);
}

#[tokio::test]
async fn big_fetch_isolates_failing_subtree() {
    let remote = seeded_source();
    remote.add_group("g1/bad", Visibility::Public);
    remote.add_project("g1/bad/lost", Visibility::Public);
    remote.fail_on("g1/bad");
    let mapping = group_mapping();

    let (instance, result) = fetch_source(remote, Scale::Big, Arc::clone(&mapping)).await;

    let errors = result.unwrap();
    assert!(!errors.is_empty());
    assert!(errors.errors().iter().all(|e| e.to_string().contains("g1/bad")));
    // Siblings are unaffected.
    assert!(instance.project("g1/sub/proj").is_some());
    assert!(instance.project("g1/bad/lost").is_none());
}

#[tokio::test]
async fn big_fetch_reports_missing_source_project() {
    let mapping = Mapping::new();
    mapping.add_project("nowhere/p", MappingEntry::new("d/p"));
    let mapping = Arc::new(mapping);

    let (_, result) = fetch_source(seeded_source(), Scale::Big, mapping).await;

    let errors = result.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors.errors()[0], SyncError::Remote { .. }));
}

#[tokio::test]
async fn big_fetch_keeps_sibling_projects_of_a_failing_one() {
    let remote = Arc::new(InMemoryRemote::new("https://src"));
    remote.add_group("g", Visibility::Public);
    let mapping = Mapping::new();
    for i in 0..5 {
        remote.add_project(&format!("g/p{i}"), Visibility::Public);
        mapping.add_project(format!("g/p{i}"), MappingEntry::new(format!("d/p{i}")));
    }
    remote.fail_on("g/p2");

    let (instance, result) = fetch_source(remote, Scale::Big, Arc::new(mapping)).await;

    assert_eq!(instance.project_paths(), vec!["g/p0", "g/p1", "g/p3", "g/p4"]);
    let errors = result.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors.errors()[0].to_string().contains("g/p2"));
}

#[tokio::test]
async fn big_fetch_reports_a_panicking_unit() {
    let remote = seeded_source();
    remote.panic_on("g1/sub");
    let mapping = group_mapping();

    let (instance, result) = fetch_source(remote, Scale::Big, Arc::clone(&mapping)).await;

    let errors = result.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors.errors()[0], SyncError::Worker(_)));
    // The walk above the panicking unit still completes.
    assert!(instance.project("g1/top").is_some());
    assert!(instance.project("g1/sub/proj").is_none());
}

// -- destination side --

#[tokio::test]
async fn destination_fetch_never_extends_mapping() {
    let remote = Arc::new(InMemoryRemote::new("https://dst"));
    remote.add_group("d1", Visibility::Public);
    remote.add_project("d1/extra", Visibility::Public);
    let mapping = group_mapping();
    let instance = Arc::new(Instance::new(Role::Destination, Scale::Small, remote));
    let filters = Arc::new(PathFilters::compile(&mapping));

    let errors = fetch::fetch(
        Arc::clone(&instance),
        Arc::clone(&mapping),
        filters,
        &FetchOptions::default(),
    )
    .await
    .unwrap();

    assert!(errors.is_empty());
    assert!(instance.project("d1/extra").is_some());
    assert_eq!(mapping.project_count(), 0);
}

#[tokio::test]
async fn big_destination_treats_missing_paths_as_absent() {
    let remote = Arc::new(InMemoryRemote::new("https://dst"));
    remote.add_group("d", Visibility::Public);
    let mapping = Mapping::new();
    mapping.add_project("g/p", MappingEntry::new("d/new/p"));
    let mapping = Arc::new(mapping);
    let instance = Arc::new(Instance::new(Role::Destination, Scale::Big, remote));
    let filters = Arc::new(PathFilters::compile(&mapping));

    let errors = fetch::fetch(
        Arc::clone(&instance),
        mapping,
        filters,
        &FetchOptions { concurrency: 2 },
    )
    .await
    .unwrap();

    assert!(errors.is_empty());
    assert_eq!(instance.group_paths(), vec!["d".to_owned()]);
    assert!(instance.project("d/new/p").is_none());
}
