use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use tree_sync::{
    AvatarFile, GroupPatch, GroupRecord, Issue, Key, License, NewGroup, NewIssue, NewProject, Page,
    ProjectPatch, ProjectRecord, PullMirror, Release, RemoteClient, RemoteError, ResourceKind, User,
};

use crate::types::{
    CATALOG_MUTATION, CATALOG_QUERY, CatalogData, CatalogStatusData, CatalogVariables,
    CreateGroupRequest, CreateIssueRequest, CreateProjectRequest, CreateReleaseRequest,
    GraphQlRequest, GraphQlResponse, GroupResponse, IssueResponse, IssueStateRequest,
    LicenseResponse, ProjectResponse, PullMirrorRequest, ReleaseResponse, UpdateRequest,
    UserResponse, VersionResponse,
};

/// Items requested per listing page; the API maximum.
pub const PER_PAGE: u32 = 100;

/// Connection settings for one GitLab instance.
#[derive(Clone)]
pub struct GitLabConfig {
    /// Instance root, e.g. `https://gitlab.example.com`.
    pub url: String,
    pub token: String,
}

impl std::fmt::Debug for GitLabConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLabConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// [`RemoteClient`] over the GitLab REST v4 API.
pub struct GitLabClient {
    config: GitLabConfig,
    client: reqwest::Client,
}

impl GitLabClient {
    pub fn new(config: GitLabConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn root(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v4{path}", self.root())
    }

    fn build_request(&self, method: Method, url: &str) -> RequestBuilder {
        tracing::debug!(%method, url, "gitlab request");
        self.client
            .request(method, url)
            .header("User-Agent", "tree-sync")
            .header("PRIVATE-TOKEN", &self.config.token)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        self.send(self.build_request(Method::GET, &self.api(path)))
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        self.send(self.build_request(method, &self.api(path)).json(body))
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))
    }

    /// Like [`Self::send_json`], for calls whose response body is unused.
    async fn send_json_unit<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<(), RemoteError> {
        self.send(self.build_request(method, &self.api(path)).json(body))
            .await
            .map(drop)
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        page: u32,
        extra: &[(&str, &str)],
    ) -> Result<Page<T>, RemoteError> {
        let page_param = page.to_string();
        let per_page = PER_PAGE.to_string();
        let request = self
            .build_request(Method::GET, &self.api(path))
            .query(&[("page", page_param.as_str()), ("per_page", per_page.as_str())])
            .query(extra);
        let response = self.send(request).await?;

        let current_page = header_number(&response, "x-page").unwrap_or(page);
        // Large listings omit the totals; an empty X-Next-Page marks the last page.
        let total_pages = header_number(&response, "x-total-pages").unwrap_or_else(|| {
            header_number(&response, "x-next-page").map_or(current_page, |_| current_page + 1)
        });
        let items = response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))?;

        Ok(Page {
            items,
            current_page,
            total_pages,
        })
    }

    /// Run a GraphQL document whose only variable is a project path.
    async fn graphql<D: DeserializeOwned>(
        &self,
        query: &'static str,
        project_path: &str,
    ) -> Result<GraphQlResponse<D>, RemoteError> {
        let url = format!("{}/api/graphql", self.root());
        let body = GraphQlRequest {
            query,
            variables: CatalogVariables { path: project_path },
        };
        self.send(
            self.client
                .post(&url)
                .header("User-Agent", "tree-sync")
                .bearer_auth(&self.config.token)
                .json(&body),
        )
        .await?
        .json()
        .await
        .map_err(|e| RemoteError::Parse(e.to_string()))
    }

    async fn group_page(
        &self,
        path: &str,
        page: u32,
        extra: &[(&str, &str)],
    ) -> Result<Page<GroupRecord>, RemoteError> {
        let raw: Page<GroupResponse> = self.get_page(path, page, extra).await?;
        Ok(convert_page(raw, GroupRecord::try_from))
    }

    async fn project_page(
        &self,
        path: &str,
        page: u32,
    ) -> Result<Page<ProjectRecord>, RemoteError> {
        let raw: Page<ProjectResponse> = self.get_page(path, page, &[]).await?;
        Ok(convert_page(raw, ProjectRecord::try_from))
    }
}

/// Items that fail to convert are logged and left out of the page.
fn convert_page<R, T>(raw: Page<R>, convert: impl Fn(R) -> Result<T, RemoteError>) -> Page<T> {
    let items = raw
        .items
        .into_iter()
        .filter_map(|item| match convert(item) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(page = raw.current_page, "skipping listed item: {e}");
                None
            }
        })
        .collect();
    Page {
        items,
        current_page: raw.current_page,
        total_pages: raw.total_pages,
    }
}

fn header_number(response: &Response, name: &str) -> Option<u32> {
    response
        .headers()
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(match status.as_u16() {
        404 => RemoteError::NotFound(message),
        409 => RemoteError::Conflict(message),
        code => RemoteError::Http {
            status: code,
            message,
        },
    })
}

/// A key as a URL path segment: ids verbatim, full paths percent-encoded.
fn segment(key: &Key) -> String {
    match key {
        Key::Id(id) => id.to_string(),
        Key::Path(path) => urlencoding::encode(path).into_owned(),
    }
}

fn resource_path(kind: ResourceKind, id: u64) -> String {
    match kind {
        ResourceKind::Group => format!("/groups/{id}"),
        ResourceKind::Project => format!("/projects/{id}"),
    }
}

/// File name from a `Content-Disposition` header, if it carries one.
fn attachment_name(response: &Response) -> Option<String> {
    let value = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;
    let (_, rest) = value.split_once("filename=")?;
    let name = rest.split(';').next()?.trim().trim_matches('"');
    (!name.is_empty()).then(|| name.to_owned())
}

#[async_trait::async_trait]
impl RemoteClient for GitLabClient {
    fn base_url(&self) -> &str {
        &self.config.url
    }

    async fn current_user(&self) -> Result<User, RemoteError> {
        self.get_json::<UserResponse>("/user").await.map(User::from)
    }

    async fn list_groups(&self, page: u32) -> Result<Page<GroupRecord>, RemoteError> {
        self.group_page("/groups", page, &[("all_available", "true")])
            .await
    }

    async fn list_subgroups(
        &self,
        group_id: u64,
        page: u32,
    ) -> Result<Page<GroupRecord>, RemoteError> {
        self.group_page(&format!("/groups/{group_id}/subgroups"), page, &[])
            .await
    }

    async fn list_group_projects(
        &self,
        group_id: u64,
        page: u32,
    ) -> Result<Page<ProjectRecord>, RemoteError> {
        self.project_page(&format!("/groups/{group_id}/projects"), page)
            .await
    }

    async fn list_projects(&self, page: u32) -> Result<Page<ProjectRecord>, RemoteError> {
        self.project_page("/projects", page).await
    }

    async fn get_group(&self, key: &Key) -> Result<GroupRecord, RemoteError> {
        let raw: GroupResponse = self.get_json(&format!("/groups/{}", segment(key))).await?;
        GroupRecord::try_from(raw)
    }

    async fn get_project(&self, key: &Key) -> Result<ProjectRecord, RemoteError> {
        let raw: ProjectResponse = self
            .get_json(&format!("/projects/{}", segment(key)))
            .await?;
        ProjectRecord::try_from(raw)
    }

    async fn create_group(&self, spec: &NewGroup) -> Result<GroupRecord, RemoteError> {
        let body = CreateGroupRequest {
            name: &spec.name,
            path: &spec.path,
            parent_id: spec.parent_id,
            description: &spec.description,
            visibility: spec.visibility.as_str(),
        };
        let raw: GroupResponse = self.send_json(Method::POST, "/groups", &body).await?;
        GroupRecord::try_from(raw)
    }

    async fn create_project(&self, spec: &NewProject) -> Result<ProjectRecord, RemoteError> {
        let body = CreateProjectRequest {
            name: &spec.name,
            path: &spec.path,
            namespace_id: spec.namespace_id,
            description: &spec.description,
            visibility: spec.visibility.as_str(),
            topics: &spec.topics,
        };
        let raw: ProjectResponse = self.send_json(Method::POST, "/projects", &body).await?;
        ProjectRecord::try_from(raw)
    }

    async fn update_group(&self, id: u64, patch: &GroupPatch) -> Result<GroupRecord, RemoteError> {
        let body = UpdateRequest {
            name: patch.name.as_deref(),
            description: patch.description.as_deref(),
            visibility: patch.visibility.map(|v| v.as_str()),
            ..UpdateRequest::default()
        };
        let raw: GroupResponse = self
            .send_json(Method::PUT, &format!("/groups/{id}"), &body)
            .await?;
        GroupRecord::try_from(raw)
    }

    async fn update_project(
        &self,
        id: u64,
        patch: &ProjectPatch,
    ) -> Result<ProjectRecord, RemoteError> {
        let body = UpdateRequest {
            visibility: patch.visibility.map(|v| v.as_str()),
            default_branch: patch.default_branch.as_deref(),
            topics: patch.topics.as_deref(),
            name: patch.name.as_deref(),
            description: patch.description.as_deref(),
        };
        let raw: ProjectResponse = self
            .send_json(Method::PUT, &format!("/projects/{id}"), &body)
            .await?;
        ProjectRecord::try_from(raw)
    }

    async fn download_avatar(&self, kind: ResourceKind, id: u64) -> Result<AvatarFile, RemoteError> {
        let url = self.api(&format!("{}/avatar", resource_path(kind, id)));
        let response = self.send(self.build_request(Method::GET, &url)).await?;
        let file_name = attachment_name(&response).unwrap_or_else(|| "avatar.png".to_owned());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(AvatarFile {
            file_name,
            bytes: bytes.to_vec(),
        })
    }

    async fn upload_avatar(
        &self,
        kind: ResourceKind,
        id: u64,
        avatar: &AvatarFile,
    ) -> Result<(), RemoteError> {
        let part = reqwest::multipart::Part::bytes(avatar.bytes.clone())
            .file_name(avatar.file_name.clone());
        let form = reqwest::multipart::Form::new().part("avatar", part);
        let url = self.api(&resource_path(kind, id));

        self.send(self.build_request(Method::PUT, &url).multipart(form))
            .await
            .map(drop)
    }

    async fn configure_pull_mirror(&self, id: u64, spec: &PullMirror) -> Result<(), RemoteError> {
        let body = PullMirrorRequest {
            enabled: true,
            url: &spec.url,
            auth_user: &spec.auth_user,
            auth_password: &spec.auth_password,
            mirror_trigger_builds: spec.trigger_builds,
            mirror_overwrites_diverged_branches: spec.overwrite_diverged_branches,
        };
        self.send_json_unit(Method::PUT, &format!("/projects/{id}/mirror/pull"), &body)
            .await
    }

    async fn platform_version(&self) -> Result<String, RemoteError> {
        self.get_json::<VersionResponse>("/version")
            .await
            .map(|v| v.version)
    }

    async fn license(&self) -> Result<License, RemoteError> {
        self.get_json::<LicenseResponse>("/license")
            .await
            .map(License::from)
    }

    async fn list_releases(&self, project_id: u64, page: u32) -> Result<Page<Release>, RemoteError> {
        let raw: Page<ReleaseResponse> = self
            .get_page(&format!("/projects/{project_id}/releases"), page, &[])
            .await?;
        Ok(convert_page(raw, |r| Ok(Release::from(r))))
    }

    async fn create_release(&self, project_id: u64, release: &Release) -> Result<(), RemoteError> {
        let body = CreateReleaseRequest {
            tag_name: &release.tag_name,
            name: &release.name,
            description: &release.description,
        };
        self.send_json_unit(Method::POST, &format!("/projects/{project_id}/releases"), &body)
            .await
    }

    async fn list_issues(&self, project_id: u64, page: u32) -> Result<Page<Issue>, RemoteError> {
        let raw: Page<IssueResponse> = self
            .get_page(
                &format!("/projects/{project_id}/issues"),
                page,
                &[("state", "all")],
            )
            .await?;
        Ok(convert_page(raw, |i| Ok(Issue::from(i))))
    }

    async fn create_issue(&self, project_id: u64, issue: &NewIssue) -> Result<Issue, RemoteError> {
        let body = CreateIssueRequest {
            title: &issue.title,
            description: &issue.description,
            labels: issue.labels.join(","),
        };
        let raw: IssueResponse = self
            .send_json(Method::POST, &format!("/projects/{project_id}/issues"), &body)
            .await?;
        Ok(Issue::from(raw))
    }

    async fn close_issue(&self, project_id: u64, issue_iid: u64) -> Result<(), RemoteError> {
        self.send_json_unit(
            Method::PUT,
            &format!("/projects/{project_id}/issues/{issue_iid}"),
            &IssueStateRequest {
                state_event: "close",
            },
        )
        .await
    }

    async fn is_catalog_resource(&self, project_path: &str) -> Result<bool, RemoteError> {
        let response: GraphQlResponse<CatalogStatusData> =
            self.graphql(CATALOG_QUERY, project_path).await?;
        let messages = response.top_level_messages();
        if !messages.is_empty() {
            return Err(RemoteError::Other(messages.join("; ")));
        }
        response
            .data
            .and_then(|d| d.project)
            .map(|p| p.is_catalog_resource)
            .ok_or_else(|| RemoteError::NotFound(format!("project {project_path}")))
    }

    async fn add_to_catalog(&self, project_path: &str) -> Result<(), RemoteError> {
        let response: GraphQlResponse<CatalogData> =
            self.graphql(CATALOG_MUTATION, project_path).await?;

        let failures: Vec<&str> = response
            .messages()
            .into_iter()
            .filter(|m| !m.contains("already"))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RemoteError::Other(failures.join("; ")))
        }
    }
}
