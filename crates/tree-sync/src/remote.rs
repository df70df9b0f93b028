use std::future::Future;

use crate::model::{
    AvatarFile, GroupRecord, Issue, Key, License, ProjectRecord, Release, ResourceKind, User,
    Visibility,
};

/// Errors that can occur when talking to a remote instance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// One page of a page-number paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub current_page: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    /// A listing that fits in a single page.
    pub fn single(items: Vec<T>) -> Self {
        Self {
            items,
            current_page: 1,
            total_pages: 1,
        }
    }

    pub fn is_last(&self) -> bool {
        self.current_page >= self.total_pages
    }
}

/// Drive a paginated listing from page 1 until the last page, appending
/// every page's items.
pub async fn collect_pages<T, F, Fut>(mut fetch_page: F) -> Result<Vec<T>, RemoteError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, RemoteError>>,
{
    let mut items = Vec::new();
    let mut page = 1;

    loop {
        let current = fetch_page(page).await?;
        let done = current.is_last() || current.current_page < page;
        items.extend(current.items);
        if done {
            return Ok(items);
        }
        page = current.current_page + 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    pub name: String,
    pub path: String,
    pub parent_id: Option<u64>,
    pub description: String,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProject {
    pub name: String,
    pub path: String,
    pub namespace_id: Option<u64>,
    pub description: String,
    pub visibility: Visibility,
    pub topics: Vec<String>,
}

/// Changed group attributes. Unset fields are left untouched remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<Visibility>,
}

impl GroupPatch {
    /// Number of fields the patch changes.
    pub fn len(&self) -> usize {
        [
            self.name.is_some(),
            self.description.is_some(),
            self.visibility.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Changed project attributes. Unset fields are left untouched remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<Visibility>,
    pub default_branch: Option<String>,
    pub topics: Option<Vec<String>>,
}

impl ProjectPatch {
    pub fn len(&self) -> usize {
        [
            self.name.is_some(),
            self.description.is_some(),
            self.visibility.is_some(),
            self.default_branch.is_some(),
            self.topics.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Native pull-mirror configuration for a destination project.
#[derive(Clone, PartialEq, Eq)]
pub struct PullMirror {
    pub url: String,
    pub auth_user: String,
    pub auth_password: String,
    pub trigger_builds: bool,
    pub overwrite_diverged_branches: bool,
}

impl std::fmt::Debug for PullMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullMirror")
            .field("url", &self.url)
            .field("auth_user", &self.auth_user)
            .field("auth_password", &"<redacted>")
            .field("trigger_builds", &self.trigger_builds)
            .field("overwrite_diverged_branches", &self.overwrite_diverged_branches)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
}

/// Client for a remote instance hosting a hierarchy of groups and projects.
///
/// Every call is a blocking suspension point for the calling unit; retries
/// and timeouts are the implementation's business.
#[async_trait::async_trait]
pub trait RemoteClient: Send + Sync {
    /// Base URL of the instance, used in log output and repository URLs.
    fn base_url(&self) -> &str;

    async fn current_user(&self) -> Result<User, RemoteError>;

    async fn list_groups(&self, page: u32) -> Result<Page<GroupRecord>, RemoteError>;

    async fn list_subgroups(
        &self,
        group_id: u64,
        page: u32,
    ) -> Result<Page<GroupRecord>, RemoteError>;

    async fn list_group_projects(
        &self,
        group_id: u64,
        page: u32,
    ) -> Result<Page<ProjectRecord>, RemoteError>;

    async fn list_projects(&self, page: u32) -> Result<Page<ProjectRecord>, RemoteError>;

    async fn get_group(&self, key: &Key) -> Result<GroupRecord, RemoteError>;

    async fn get_project(&self, key: &Key) -> Result<ProjectRecord, RemoteError>;

    async fn create_group(&self, spec: &NewGroup) -> Result<GroupRecord, RemoteError>;

    async fn create_project(&self, spec: &NewProject) -> Result<ProjectRecord, RemoteError>;

    async fn update_group(&self, id: u64, patch: &GroupPatch)
    -> Result<GroupRecord, RemoteError>;

    async fn update_project(
        &self,
        id: u64,
        patch: &ProjectPatch,
    ) -> Result<ProjectRecord, RemoteError>;

    async fn download_avatar(&self, kind: ResourceKind, id: u64) -> Result<AvatarFile, RemoteError>;

    async fn upload_avatar(
        &self,
        kind: ResourceKind,
        id: u64,
        avatar: &AvatarFile,
    ) -> Result<(), RemoteError>;

    async fn configure_pull_mirror(&self, id: u64, spec: &PullMirror) -> Result<(), RemoteError>;

    async fn platform_version(&self) -> Result<String, RemoteError>;

    async fn license(&self) -> Result<License, RemoteError>;

    async fn list_releases(&self, project_id: u64, page: u32)
    -> Result<Page<Release>, RemoteError>;

    async fn create_release(&self, project_id: u64, release: &Release) -> Result<(), RemoteError>;

    async fn list_issues(&self, project_id: u64, page: u32) -> Result<Page<Issue>, RemoteError>;

    async fn create_issue(&self, project_id: u64, issue: &NewIssue) -> Result<Issue, RemoteError>;

    async fn close_issue(&self, project_id: u64, issue_iid: u64) -> Result<(), RemoteError>;

    /// Whether a project is already a CI/CD catalog resource.
    async fn is_catalog_resource(&self, project_path: &str) -> Result<bool, RemoteError>;

    /// Register a project as a CI/CD catalog resource.
    async fn add_to_catalog(&self, project_path: &str) -> Result<(), RemoteError>;
}
