use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::git::{BareRepo, Credentials, GitError, GitTransport};
use crate::model::{
    AvatarFile, GroupRecord, Issue, Key, License, ProjectRecord, Release, ResourceKind, User,
    Visibility,
};
use crate::path;
use crate::remote::{
    GroupPatch, NewGroup, NewIssue, NewProject, Page, ProjectPatch, PullMirror, RemoteClient,
    RemoteError,
};

/// A group record with defaults, for tests that build caches by hand.
pub fn group_record(id: u64, full_path: &str) -> GroupRecord {
    let leaf = path::basename(full_path).to_owned();
    GroupRecord {
        id,
        name: leaf.clone(),
        path: leaf,
        full_path: full_path.to_owned(),
        description: String::new(),
        visibility: Visibility::Private,
        avatar_url: None,
        parent_id: None,
    }
}

/// A project record with defaults, for tests that build caches by hand.
pub fn project_record(id: u64, full_path: &str) -> ProjectRecord {
    let leaf = path::basename(full_path).to_owned();
    ProjectRecord {
        id,
        name: leaf.clone(),
        path: leaf,
        full_path: full_path.to_owned(),
        description: String::new(),
        visibility: Visibility::Private,
        default_branch: Some("main".to_owned()),
        avatar_url: None,
        topics: Vec::new(),
        namespace_id: 0,
        http_url: format!("https://example.test/{full_path}.git"),
        mirror: false,
        mirror_trigger_builds: false,
    }
}

/// In-memory remote instance for testing.
///
/// Behaves like a small hosting platform: paths are unique, children may
/// not be more visible than their parent group, listings are paginated.
/// Every write is recorded as `"<operation> <full path>"`.
pub struct InMemoryRemote {
    base_url: String,
    state: Mutex<State>,
}

struct State {
    next_id: u64,
    groups: BTreeMap<String, GroupRecord>,
    projects: BTreeMap<String, ProjectRecord>,
    avatars: HashMap<(ResourceKind, u64), AvatarFile>,
    issues: HashMap<u64, Vec<Issue>>,
    releases: HashMap<u64, Vec<Release>>,
    mirrors: HashMap<u64, PullMirror>,
    catalog: Vec<String>,
    version: String,
    license: License,
    license_fails: bool,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    page_size: usize,
    writes: Vec<String>,
}

impl InMemoryRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            state: Mutex::new(State {
                next_id: 1,
                groups: BTreeMap::new(),
                projects: BTreeMap::new(),
                avatars: HashMap::new(),
                issues: HashMap::new(),
                releases: HashMap::new(),
                mirrors: HashMap::new(),
                catalog: Vec::new(),
                version: "17.8.0-ee".to_owned(),
                license: License {
                    tier: "premium".to_owned(),
                    expired: false,
                },
                license_fails: false,
                failing: HashSet::new(),
                panicking: HashSet::new(),
                page_size: 100,
                writes: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a group. Its parent, if any, must already exist.
    pub fn add_group(&self, full_path: &str, visibility: Visibility) -> GroupRecord {
        let mut state = self.state();
        let mut record = group_record(state.allocate_id(), full_path);
        record.visibility = visibility;
        record.parent_id = path::dirname(full_path)
            .and_then(|parent| state.groups.get(parent))
            .map(|parent| parent.id);
        state.groups.insert(full_path.to_owned(), record.clone());
        record
    }

    /// Seed a project on branch `main`. Its group, if any, must already exist.
    pub fn add_project(&self, full_path: &str, visibility: Visibility) -> ProjectRecord {
        let mut state = self.state();
        let mut record = project_record(state.allocate_id(), full_path);
        record.visibility = visibility;
        record.http_url = format!("{}/{full_path}.git", self.base_url);
        record.namespace_id = path::dirname(full_path)
            .and_then(|parent| state.groups.get(parent))
            .map_or(0, |parent| parent.id);
        state.projects.insert(full_path.to_owned(), record.clone());
        record
    }

    /// Give a seeded group or project an avatar.
    pub fn set_avatar(&self, kind: ResourceKind, full_path: &str, file_name: &str) {
        let mut state = self.state();
        let url = format!("{}/uploads/{file_name}", self.base_url);
        let id = match kind {
            ResourceKind::Group => state.groups.get_mut(full_path).map(|g| {
                g.avatar_url = Some(url);
                g.id
            }),
            ResourceKind::Project => state.projects.get_mut(full_path).map(|p| {
                p.avatar_url = Some(url);
                p.id
            }),
        };
        if let Some(id) = id {
            state.avatars.insert(
                (kind, id),
                AvatarFile {
                    file_name: file_name.to_owned(),
                    bytes: file_name.as_bytes().to_vec(),
                },
            );
        }
    }

    pub fn add_issue(&self, project_path: &str, title: &str, closed: bool) {
        let mut state = self.state();
        if let Some(id) = state.projects.get(project_path).map(|p| p.id) {
            let issues = state.issues.entry(id).or_default();
            issues.push(Issue {
                iid: issues.len() as u64 + 1,
                title: title.to_owned(),
                description: format!("{title} details"),
                labels: Vec::new(),
                closed,
            });
        }
    }

    pub fn add_release(&self, project_path: &str, tag_name: &str) {
        let mut state = self.state();
        if let Some(id) = state.projects.get(project_path).map(|p| p.id) {
            // Newest first, like the real listing.
            state.releases.entry(id).or_default().insert(
                0,
                Release {
                    tag_name: tag_name.to_owned(),
                    name: tag_name.to_owned(),
                    description: String::new(),
                },
            );
        }
    }

    pub fn set_version(&self, version: &str) {
        self.state().version = version.to_owned();
    }

    pub fn set_license(&self, license: License) {
        self.state().license = license;
    }

    /// Make the license query fail.
    pub fn fail_license(&self) {
        self.state().license_fails = true;
    }

    /// Make every call touching `full_path` fail with a server error.
    pub fn fail_on(&self, full_path: &str) {
        self.state().failing.insert(full_path.to_owned());
    }

    /// Make every call touching `full_path` panic mid-request.
    pub fn panic_on(&self, full_path: &str) {
        self.state().panicking.insert(full_path.to_owned());
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.state().page_size = page_size.max(1);
    }

    /// Every write so far, in order.
    pub fn writes(&self) -> Vec<String> {
        self.state().writes.clone()
    }

    /// Writes whose operation is `operation`.
    pub fn writes_of(&self, operation: &str) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter(|w| w.split(' ').next() == Some(operation))
            .collect()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    pub fn group(&self, full_path: &str) -> Option<GroupRecord> {
        self.state().groups.get(full_path).cloned()
    }

    pub fn project(&self, full_path: &str) -> Option<ProjectRecord> {
        self.state().projects.get(full_path).cloned()
    }

    pub fn issues(&self, project_path: &str) -> Vec<Issue> {
        let state = self.state();
        state
            .projects
            .get(project_path)
            .and_then(|p| state.issues.get(&p.id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn release_tags(&self, project_path: &str) -> Vec<String> {
        let state = self.state();
        state
            .projects
            .get(project_path)
            .and_then(|p| state.releases.get(&p.id))
            .map(|releases| releases.iter().map(|r| r.tag_name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn pull_mirror(&self, project_path: &str) -> Option<PullMirror> {
        let state = self.state();
        state
            .projects
            .get(project_path)
            .and_then(|p| state.mirrors.get(&p.id))
            .cloned()
    }

    pub fn catalog(&self) -> Vec<String> {
        self.state().catalog.clone()
    }
}

impl State {
    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check(&self, full_path: &str) -> Result<(), RemoteError> {
        if self.panicking.contains(full_path) {
            panic!("injected panic for {full_path}");
        }
        if self.failing.contains(full_path) {
            Err(RemoteError::Http {
                status: 500,
                message: format!("injected failure for {full_path}"),
            })
        } else {
            Ok(())
        }
    }

    fn group_by_id(&self, id: u64) -> Result<&GroupRecord, RemoteError> {
        self.groups
            .values()
            .find(|g| g.id == id)
            .ok_or_else(|| RemoteError::NotFound(format!("group {id}")))
    }

    fn project_by_id(&self, id: u64) -> Result<&ProjectRecord, RemoteError> {
        self.projects
            .values()
            .find(|p| p.id == id)
            .ok_or_else(|| RemoteError::NotFound(format!("project {id}")))
    }

    fn project_path_of(&self, id: u64) -> Result<String, RemoteError> {
        let path = self.project_by_id(id)?.full_path.clone();
        self.check(&path)?;
        Ok(path)
    }

    fn page<T: Clone>(&self, items: Vec<T>, page: u32) -> Page<T> {
        let total_pages = items.len().div_ceil(self.page_size).max(1) as u32;
        let start = (page.max(1) as usize - 1) * self.page_size;
        Page {
            items: items.into_iter().skip(start).take(self.page_size).collect(),
            current_page: page.max(1),
            total_pages,
        }
    }

    /// Full path of a new child of `parent_id`, checking that its
    /// visibility does not exceed the parent's.
    fn placement(
        &self,
        parent_id: Option<u64>,
        leaf: &str,
        visibility: Visibility,
    ) -> Result<String, RemoteError> {
        let full_path = match parent_id {
            None => leaf.to_owned(),
            Some(id) => {
                let parent = self.group_by_id(id)?;
                if visibility > parent.visibility {
                    return Err(RemoteError::Http {
                        status: 400,
                        message: format!(
                            "visibility {visibility} is not allowed in a {} group",
                            parent.visibility
                        ),
                    });
                }
                path::join(&parent.full_path, leaf)
            }
        };
        self.check(&full_path)?;
        if self.groups.contains_key(&full_path) || self.projects.contains_key(&full_path) {
            return Err(RemoteError::Conflict(format!("{full_path} has already been taken")));
        }
        Ok(full_path)
    }
}

#[async_trait::async_trait]
impl RemoteClient for InMemoryRemote {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn current_user(&self) -> Result<User, RemoteError> {
        Ok(User {
            id: 1,
            username: "root".to_owned(),
        })
    }

    async fn list_groups(&self, page: u32) -> Result<Page<GroupRecord>, RemoteError> {
        let state = self.state();
        let groups = state.groups.values().cloned().collect();
        Ok(state.page(groups, page))
    }

    async fn list_subgroups(
        &self,
        group_id: u64,
        page: u32,
    ) -> Result<Page<GroupRecord>, RemoteError> {
        let state = self.state();
        let parent = state.group_by_id(group_id)?;
        state.check(&parent.full_path)?;
        let children = state
            .groups
            .values()
            .filter(|g| g.parent_id == Some(group_id))
            .cloned()
            .collect();
        Ok(state.page(children, page))
    }

    async fn list_group_projects(
        &self,
        group_id: u64,
        page: u32,
    ) -> Result<Page<ProjectRecord>, RemoteError> {
        let state = self.state();
        let parent = state.group_by_id(group_id)?;
        state.check(&parent.full_path)?;
        let projects = state
            .projects
            .values()
            .filter(|p| p.namespace_id == group_id)
            .cloned()
            .collect();
        Ok(state.page(projects, page))
    }

    async fn list_projects(&self, page: u32) -> Result<Page<ProjectRecord>, RemoteError> {
        let state = self.state();
        let projects = state.projects.values().cloned().collect();
        Ok(state.page(projects, page))
    }

    async fn get_group(&self, key: &Key) -> Result<GroupRecord, RemoteError> {
        let state = self.state();
        let found = match key {
            Key::Id(id) => state.group_by_id(*id).ok(),
            Key::Path(path) => state.groups.get(path),
        }
        .ok_or_else(|| RemoteError::NotFound(format!("group {key}")))?;
        state.check(&found.full_path)?;
        Ok(found.clone())
    }

    async fn get_project(&self, key: &Key) -> Result<ProjectRecord, RemoteError> {
        let state = self.state();
        let found = match key {
            Key::Id(id) => state.project_by_id(*id).ok(),
            Key::Path(path) => state.projects.get(path),
        }
        .ok_or_else(|| RemoteError::NotFound(format!("project {key}")))?;
        state.check(&found.full_path)?;
        Ok(found.clone())
    }

    async fn create_group(&self, spec: &NewGroup) -> Result<GroupRecord, RemoteError> {
        let mut state = self.state();
        let full_path = state.placement(spec.parent_id, &spec.path, spec.visibility)?;
        let record = GroupRecord {
            id: state.allocate_id(),
            name: spec.name.clone(),
            path: spec.path.clone(),
            full_path: full_path.clone(),
            description: spec.description.clone(),
            visibility: spec.visibility,
            avatar_url: None,
            parent_id: spec.parent_id,
        };
        state.groups.insert(full_path.clone(), record.clone());
        state.writes.push(format!("create_group {full_path}"));
        Ok(record)
    }

    async fn create_project(&self, spec: &NewProject) -> Result<ProjectRecord, RemoteError> {
        let mut state = self.state();
        let full_path = state.placement(spec.namespace_id, &spec.path, spec.visibility)?;
        let record = ProjectRecord {
            id: state.allocate_id(),
            name: spec.name.clone(),
            path: spec.path.clone(),
            full_path: full_path.clone(),
            description: spec.description.clone(),
            visibility: spec.visibility,
            default_branch: None,
            avatar_url: None,
            topics: spec.topics.clone(),
            namespace_id: spec.namespace_id.unwrap_or(0),
            http_url: format!("{}/{full_path}.git", self.base_url),
            mirror: false,
            mirror_trigger_builds: false,
        };
        state.projects.insert(full_path.clone(), record.clone());
        state.writes.push(format!("create_project {full_path}"));
        Ok(record)
    }

    async fn update_group(&self, id: u64, patch: &GroupPatch) -> Result<GroupRecord, RemoteError> {
        let mut state = self.state();
        let full_path = state.group_by_id(id)?.full_path.clone();
        state.check(&full_path)?;
        let record = state
            .groups
            .get_mut(&full_path)
            .ok_or_else(|| RemoteError::NotFound(full_path.clone()))?;
        if let Some(name) = &patch.name {
            record.name = name.clone();
        }
        if let Some(description) = &patch.description {
            record.description = description.clone();
        }
        if let Some(visibility) = patch.visibility {
            record.visibility = visibility;
        }
        let record = record.clone();
        state.writes.push(format!("update_group {full_path}"));
        Ok(record)
    }

    async fn update_project(
        &self,
        id: u64,
        patch: &ProjectPatch,
    ) -> Result<ProjectRecord, RemoteError> {
        let mut state = self.state();
        let full_path = state.project_path_of(id)?;
        let record = state
            .projects
            .get_mut(&full_path)
            .ok_or_else(|| RemoteError::NotFound(full_path.clone()))?;
        if let Some(name) = &patch.name {
            record.name = name.clone();
        }
        if let Some(description) = &patch.description {
            record.description = description.clone();
        }
        if let Some(visibility) = patch.visibility {
            record.visibility = visibility;
        }
        if let Some(branch) = &patch.default_branch {
            record.default_branch = Some(branch.clone());
        }
        if let Some(topics) = &patch.topics {
            record.topics = topics.clone();
        }
        let record = record.clone();
        state.writes.push(format!("update_project {full_path}"));
        Ok(record)
    }

    async fn download_avatar(&self, kind: ResourceKind, id: u64) -> Result<AvatarFile, RemoteError> {
        self.state()
            .avatars
            .get(&(kind, id))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("{kind} {id} avatar")))
    }

    async fn upload_avatar(
        &self,
        kind: ResourceKind,
        id: u64,
        avatar: &AvatarFile,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        let url = format!("{}/uploads/{}", self.base_url, avatar.file_name);
        let full_path = match kind {
            ResourceKind::Group => {
                let path = state.group_by_id(id)?.full_path.clone();
                if let Some(group) = state.groups.get_mut(&path) {
                    group.avatar_url = Some(url);
                }
                path
            }
            ResourceKind::Project => {
                let path = state.project_path_of(id)?;
                if let Some(project) = state.projects.get_mut(&path) {
                    project.avatar_url = Some(url);
                }
                path
            }
        };
        state.avatars.insert((kind, id), avatar.clone());
        state.writes.push(format!("upload_avatar {full_path}"));
        Ok(())
    }

    async fn configure_pull_mirror(&self, id: u64, spec: &PullMirror) -> Result<(), RemoteError> {
        let mut state = self.state();
        let full_path = state.project_path_of(id)?;
        if let Some(project) = state.projects.get_mut(&full_path) {
            project.mirror = true;
            project.mirror_trigger_builds = spec.trigger_builds;
        }
        state.mirrors.insert(id, spec.clone());
        state.writes.push(format!("configure_pull_mirror {full_path}"));
        Ok(())
    }

    async fn platform_version(&self) -> Result<String, RemoteError> {
        Ok(self.state().version.clone())
    }

    async fn license(&self) -> Result<License, RemoteError> {
        let state = self.state();
        if state.license_fails {
            return Err(RemoteError::Http {
                status: 403,
                message: "license unavailable".to_owned(),
            });
        }
        Ok(state.license.clone())
    }

    async fn list_releases(&self, project_id: u64, page: u32) -> Result<Page<Release>, RemoteError> {
        let state = self.state();
        state.project_path_of(project_id)?;
        let releases = state.releases.get(&project_id).cloned().unwrap_or_default();
        Ok(state.page(releases, page))
    }

    async fn create_release(&self, project_id: u64, release: &Release) -> Result<(), RemoteError> {
        let mut state = self.state();
        let full_path = state.project_path_of(project_id)?;
        state
            .releases
            .entry(project_id)
            .or_default()
            .insert(0, release.clone());
        state
            .writes
            .push(format!("create_release {full_path}:{}", release.tag_name));
        Ok(())
    }

    async fn list_issues(&self, project_id: u64, page: u32) -> Result<Page<Issue>, RemoteError> {
        let state = self.state();
        state.project_path_of(project_id)?;
        // Newest first, like the real listing.
        let mut issues = state.issues.get(&project_id).cloned().unwrap_or_default();
        issues.reverse();
        Ok(state.page(issues, page))
    }

    async fn create_issue(&self, project_id: u64, issue: &NewIssue) -> Result<Issue, RemoteError> {
        let mut state = self.state();
        let full_path = state.project_path_of(project_id)?;
        let issues = state.issues.entry(project_id).or_default();
        let created = Issue {
            iid: issues.len() as u64 + 1,
            title: issue.title.clone(),
            description: issue.description.clone(),
            labels: issue.labels.clone(),
            closed: false,
        };
        issues.push(created.clone());
        state
            .writes
            .push(format!("create_issue {full_path}#{}", created.iid));
        Ok(created)
    }

    async fn close_issue(&self, project_id: u64, issue_iid: u64) -> Result<(), RemoteError> {
        let mut state = self.state();
        let full_path = state.project_path_of(project_id)?;
        let issue = state
            .issues
            .get_mut(&project_id)
            .and_then(|issues| issues.iter_mut().find(|i| i.iid == issue_iid))
            .ok_or_else(|| RemoteError::NotFound(format!("issue {full_path}#{issue_iid}")))?;
        issue.closed = true;
        state.writes.push(format!("close_issue {full_path}#{issue_iid}"));
        Ok(())
    }

    async fn is_catalog_resource(&self, project_path: &str) -> Result<bool, RemoteError> {
        let state = self.state();
        state.check(project_path)?;
        Ok(state.catalog.iter().any(|p| p == project_path))
    }

    /// Every call is recorded as a write, as the real mutation is sent
    /// each time; the catalog itself holds each project once.
    async fn add_to_catalog(&self, project_path: &str) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.check(project_path)?;
        if !state.catalog.iter().any(|p| p == project_path) {
            state.catalog.push(project_path.to_owned());
        }
        state.writes.push(format!("add_to_catalog {project_path}"));
        Ok(())
    }
}

/// Git transport that records what it was asked to do instead of running
/// git. Every clone reports `head` as its symbolic HEAD.
pub struct FakeGitTransport {
    head: String,
    steps: Mutex<Vec<String>>,
    failing_clones: Mutex<HashSet<String>>,
    remotes: Mutex<HashMap<(PathBuf, String), String>>,
    pushes: Mutex<Vec<String>>,
}

impl FakeGitTransport {
    pub fn new(head: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            steps: Mutex::new(Vec::new()),
            failing_clones: Mutex::new(HashSet::new()),
            remotes: Mutex::new(HashMap::new()),
            pushes: Mutex::new(Vec::new()),
        }
    }

    /// Make cloning `url` fail.
    pub fn fail_clone_of(&self, url: &str) {
        lock(&self.failing_clones).insert(url.to_owned());
    }

    /// Every step taken, in order, e.g. `"clone <url>"` or `"push <remote>"`.
    pub fn steps(&self) -> Vec<String> {
        lock(&self.steps).clone()
    }

    /// URLs that received a force push.
    pub fn pushed_urls(&self) -> Vec<String> {
        lock(&self.pushes).clone()
    }

    fn record(&self, step: String) {
        lock(&self.steps).push(step);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GitTransport for FakeGitTransport {
    fn mirror_clone(
        &self,
        url: &str,
        _credentials: &Credentials,
        dir: &Path,
    ) -> Result<BareRepo, GitError> {
        self.record(format!("clone {url}"));
        if lock(&self.failing_clones).contains(url) {
            return Err(GitError::Clone(format!("{url}: repository not found")));
        }
        std::fs::create_dir_all(dir).map_err(|e| GitError::Io(e.to_string()))?;
        Ok(BareRepo {
            path: dir.to_path_buf(),
        })
    }

    fn add_remote(&self, repo: &BareRepo, name: &str, url: &str) -> Result<(), GitError> {
        self.record(format!("remote {name} {url}"));
        lock(&self.remotes).insert((repo.path.clone(), name.to_owned()), url.to_owned());
        Ok(())
    }

    fn force_push_all_refs(
        &self,
        repo: &BareRepo,
        remote: &str,
        _credentials: &Credentials,
    ) -> Result<(), GitError> {
        self.record(format!("push {remote}"));
        let url = lock(&self.remotes)
            .get(&(repo.path.clone(), remote.to_owned()))
            .cloned()
            .ok_or_else(|| GitError::Remote(format!("no remote named {remote}")))?;
        lock(&self.pushes).push(url);
        Ok(())
    }

    fn read_symbolic_head(&self, _repo: &BareRepo) -> Result<String, GitError> {
        self.record("head".to_owned());
        Ok(self.head.clone())
    }
}

#[cfg(test)]
mod tests {
    use crate::remote::collect_pages;

    use super::*;

    #[tokio::test]
    async fn listings_are_paginated() {
        let remote = InMemoryRemote::new("https://src");
        remote.set_page_size(2);
        for name in ["a", "b", "c", "d", "e"] {
            remote.add_group(name, Visibility::Public);
        }

        let first = remote.list_groups(1).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.total_pages, 3);

        let all = collect_pages(|page| remote.list_groups(page)).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn create_rejects_taken_paths() {
        let remote = InMemoryRemote::new("https://dst");
        let parent = remote.add_group("g", Visibility::Public);
        remote.add_project("g/p", Visibility::Public);

        let spec = NewProject {
            name: "p".into(),
            path: "p".into(),
            namespace_id: Some(parent.id),
            description: String::new(),
            visibility: Visibility::Public,
            topics: vec![],
        };
        let result = remote.create_project(&spec).await;
        assert!(matches!(result, Err(RemoteError::Conflict(_))));
        assert!(remote.writes().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_child_more_visible_than_parent() {
        let remote = InMemoryRemote::new("https://dst");
        let parent = remote.add_group("g", Visibility::Private);

        let spec = NewGroup {
            name: "sub".into(),
            path: "sub".into(),
            parent_id: Some(parent.id),
            description: String::new(),
            visibility: Visibility::Public,
        };
        let result = remote.create_group(&spec).await;
        assert!(matches!(result, Err(RemoteError::Http { status: 400, .. })));
    }

    #[tokio::test]
    async fn injected_failures_hit_only_their_path() {
        let remote = InMemoryRemote::new("https://src");
        remote.add_project("ok", Visibility::Private);
        remote.add_project("broken", Visibility::Private);
        remote.fail_on("broken");

        assert!(remote.get_project(&Key::path("ok")).await.is_ok());
        assert!(remote.get_project(&Key::path("broken")).await.is_err());
    }

    #[test]
    fn fake_git_records_pushes_per_remote() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGitTransport::new("refs/heads/main");
        let creds = Credentials::token("t");

        let repo = git
            .mirror_clone("https://src/p.git", &creds, &dir.path().join("repo.git"))
            .unwrap();
        git.add_remote(&repo, "destination", "https://dst/p.git").unwrap();
        git.force_push_all_refs(&repo, "destination", &creds).unwrap();

        assert_eq!(git.pushed_urls(), vec!["https://dst/p.git".to_owned()]);
        assert!(git.force_push_all_refs(&repo, "nowhere", &creds).is_err());
    }
}
