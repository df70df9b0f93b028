//! Wire shapes of the GitLab REST and GraphQL APIs.

use serde::{Deserialize, Serialize};

use tree_sync::{GroupRecord, Issue, License, ProjectRecord, Release, RemoteError, User, Visibility};

fn visibility(raw: &str) -> Result<Visibility, RemoteError> {
    Visibility::parse(raw).ok_or_else(|| RemoteError::Parse(format!("unknown visibility {raw:?}")))
}

/// `GET /groups/:id` and the group listings.
#[derive(Debug, Deserialize)]
pub struct GroupResponse {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub full_path: String,
    #[serde(default)]
    pub description: Option<String>,
    pub visibility: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub parent_id: Option<u64>,
}

impl TryFrom<GroupResponse> for GroupRecord {
    type Error = RemoteError;

    fn try_from(g: GroupResponse) -> Result<Self, Self::Error> {
        Ok(GroupRecord {
            visibility: visibility(&g.visibility)?,
            id: g.id,
            name: g.name,
            path: g.path,
            full_path: g.full_path,
            description: g.description.unwrap_or_default(),
            avatar_url: g.avatar_url,
            parent_id: g.parent_id,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct NamespaceResponse {
    pub id: u64,
}

/// `GET /projects/:id` and the project listings.
#[derive(Debug, Deserialize)]
pub struct ProjectResponse {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub path_with_namespace: String,
    #[serde(default)]
    pub description: Option<String>,
    pub visibility: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub namespace: NamespaceResponse,
    pub http_url_to_repo: String,
    #[serde(default)]
    pub mirror: bool,
    #[serde(default)]
    pub mirror_trigger_builds: bool,
}

impl TryFrom<ProjectResponse> for ProjectRecord {
    type Error = RemoteError;

    fn try_from(p: ProjectResponse) -> Result<Self, Self::Error> {
        Ok(ProjectRecord {
            visibility: visibility(&p.visibility)?,
            id: p.id,
            name: p.name,
            path: p.path,
            full_path: p.path_with_namespace,
            description: p.description.unwrap_or_default(),
            default_branch: p.default_branch,
            avatar_url: p.avatar_url,
            topics: p.topics,
            namespace_id: p.namespace.id,
            http_url: p.http_url_to_repo,
            mirror: p.mirror,
            mirror_trigger_builds: p.mirror_trigger_builds,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct UserResponse {
    pub id: u64,
    pub username: String,
}

impl From<UserResponse> for User {
    fn from(u: UserResponse) -> Self {
        User {
            id: u.id,
            username: u.username,
        }
    }
}

/// `GET /version`
#[derive(Debug, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

/// `GET /license`
#[derive(Debug, Deserialize)]
pub struct LicenseResponse {
    pub plan: String,
    #[serde(default)]
    pub expired: bool,
}

impl From<LicenseResponse> for License {
    fn from(l: LicenseResponse) -> Self {
        License {
            tier: l.plan,
            expired: l.expired,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReleaseResponse {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<ReleaseResponse> for Release {
    fn from(r: ReleaseResponse) -> Self {
        Release {
            name: r.name.unwrap_or_else(|| r.tag_name.clone()),
            tag_name: r.tag_name,
            description: r.description.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IssueResponse {
    pub iid: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub state: String,
}

impl From<IssueResponse> for Issue {
    fn from(i: IssueResponse) -> Self {
        Issue {
            closed: i.state == "closed",
            iid: i.iid,
            title: i.title,
            description: i.description.unwrap_or_default(),
            labels: i.labels,
        }
    }
}

/// Body of `POST /groups`.
#[derive(Debug, Serialize)]
pub struct CreateGroupRequest<'a> {
    pub name: &'a str,
    pub path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    pub description: &'a str,
    pub visibility: &'static str,
}

/// Body of `POST /projects`.
#[derive(Debug, Serialize)]
pub struct CreateProjectRequest<'a> {
    pub name: &'a str,
    pub path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<u64>,
    pub description: &'a str,
    pub visibility: &'static str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub topics: &'a [String],
}

/// Body of `PUT /groups/:id` and `PUT /projects/:id`; unset fields are
/// left out so the server keeps them.
#[derive(Debug, Default, Serialize)]
pub struct UpdateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<&'a [String]>,
}

/// Body of `PUT /projects/:id/mirror/pull`.
#[derive(Serialize)]
pub struct PullMirrorRequest<'a> {
    pub enabled: bool,
    pub url: &'a str,
    pub auth_user: &'a str,
    pub auth_password: &'a str,
    pub mirror_trigger_builds: bool,
    pub mirror_overwrites_diverged_branches: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateReleaseRequest<'a> {
    pub tag_name: &'a str,
    pub name: &'a str,
    pub description: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CreateIssueRequest<'a> {
    pub title: &'a str,
    pub description: &'a str,
    /// Comma-separated, as the API expects.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub labels: String,
}

#[derive(Debug, Serialize)]
pub struct IssueStateRequest {
    pub state_event: &'static str,
}

pub const CATALOG_MUTATION: &str = "mutation($path: ID!) { \
    catalogResourcesCreate(input: { projectPath: $path }) { errors } }";

pub const CATALOG_QUERY: &str = "query($path: ID!) { \
    project(fullPath: $path) { isCatalogResource } }";

#[derive(Debug, Serialize)]
pub struct GraphQlRequest<'a> {
    pub query: &'static str,
    pub variables: CatalogVariables<'a>,
}

#[derive(Debug, Serialize)]
pub struct CatalogVariables<'a> {
    pub path: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<D> {
    pub data: Option<D>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub struct CatalogData {
    #[serde(rename = "catalogResourcesCreate")]
    pub catalog_resources_create: Option<MutationResult>,
}

#[derive(Debug, Deserialize)]
pub struct CatalogStatusData {
    pub project: Option<CatalogStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CatalogStatus {
    #[serde(rename = "isCatalogResource", default)]
    pub is_catalog_resource: bool,
}

#[derive(Debug, Deserialize)]
pub struct MutationResult {
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

impl<D> GraphQlResponse<D> {
    pub fn top_level_messages(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.message.as_str()).collect()
    }
}

impl GraphQlResponse<CatalogData> {
    /// Every error message, top-level and mutation-level.
    pub fn messages(&self) -> Vec<&str> {
        let mutation = self
            .data
            .as_ref()
            .and_then(|d| d.catalog_resources_create.as_ref())
            .map(|m| m.errors.as_slice())
            .unwrap_or_default();
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .chain(mutation.iter().map(String::as_str))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_response_maps_to_record() {
        let json = r#"{
            "id": 7,
            "name": "Proj",
            "path": "proj",
            "path_with_namespace": "g/proj",
            "description": null,
            "visibility": "internal",
            "default_branch": "main",
            "topics": ["rust"],
            "namespace": {"id": 3, "full_path": "g"},
            "http_url_to_repo": "https://gitlab.example/g/proj.git",
            "mirror": true
        }"#;
        let response: ProjectResponse = serde_json::from_str(json).unwrap();
        let record = ProjectRecord::try_from(response).unwrap();

        assert_eq!(record.full_path, "g/proj");
        assert_eq!(record.description, "");
        assert_eq!(record.visibility, Visibility::Internal);
        assert_eq!(record.namespace_id, 3);
        assert!(record.mirror);
        assert!(!record.mirror_trigger_builds);
    }

    #[test]
    fn unknown_visibility_is_a_parse_error() {
        let json = r#"{"id": 1, "name": "g", "path": "g", "full_path": "g", "visibility": "secret"}"#;
        let response: GroupResponse = serde_json::from_str(json).unwrap();
        assert!(matches!(GroupRecord::try_from(response), Err(RemoteError::Parse(_))));
    }

    #[test]
    fn update_request_omits_unset_fields() {
        let body = UpdateRequest {
            visibility: Some("public"),
            ..UpdateRequest::default()
        };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"visibility":"public"}"#);
    }

    #[test]
    fn graphql_messages_merge_both_levels() {
        let json = r#"{
            "data": {"catalogResourcesCreate": {"errors": ["Project is already a catalog resource"]}},
            "errors": [{"message": "boom"}]
        }"#;
        let response: GraphQlResponse<CatalogData> = serde_json::from_str(json).unwrap();
        assert_eq!(
            response.messages(),
            vec!["boom", "Project is already a catalog resource"]
        );
    }
}
