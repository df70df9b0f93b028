use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::model::{GroupRecord, ProjectRecord, Role, Scale, User};
use crate::remote::{RemoteClient, RemoteError};

/// One remote endpoint taking part in a run, with its discovery cache.
///
/// Groups and projects are keyed by full path. Reads take a shared lock,
/// writes an exclusive one; records are overwritten on re-fetch and never
/// removed.
pub struct Instance {
    role: Role,
    scale: Scale,
    client: Arc<dyn RemoteClient>,
    identity: Option<User>,
    groups: RwLock<HashMap<String, GroupRecord>>,
    projects: RwLock<HashMap<String, ProjectRecord>>,
}

impl Instance {
    pub fn new(role: Role, scale: Scale, client: Arc<dyn RemoteClient>) -> Self {
        Self {
            role,
            scale,
            client,
            identity: None,
            groups: RwLock::new(HashMap::new()),
            projects: RwLock::new(HashMap::new()),
        }
    }

    /// Build an instance and record who its client is authenticated as.
    pub async fn connect(
        role: Role,
        scale: Scale,
        client: Arc<dyn RemoteClient>,
    ) -> Result<Self, RemoteError> {
        let user = client.current_user().await?;
        tracing::info!(
            %role,
            %scale,
            url = client.base_url(),
            user = %user.username,
            "connected"
        );
        let mut instance = Self::new(role, scale, client);
        instance.identity = Some(user);
        Ok(instance)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn client(&self) -> &dyn RemoteClient {
        self.client.as_ref()
    }

    pub fn identity(&self) -> Option<&User> {
        self.identity.as_ref()
    }

    pub fn url(&self) -> &str {
        self.client.base_url()
    }

    pub fn put_group(&self, record: GroupRecord) {
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.full_path.clone(), record);
    }

    pub fn group(&self, full_path: &str) -> Option<GroupRecord> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(full_path)
            .cloned()
    }

    pub fn put_project(&self, record: ProjectRecord) {
        self.projects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.full_path.clone(), record);
    }

    pub fn project(&self, full_path: &str) -> Option<ProjectRecord> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(full_path)
            .cloned()
    }

    /// Cached group paths, sorted.
    pub fn group_paths(&self) -> Vec<String> {
        sorted_keys(&self.groups)
    }

    /// Cached project paths, sorted.
    pub fn project_paths(&self) -> Vec<String> {
        sorted_keys(&self.projects)
    }
}

fn sorted_keys<V>(table: &RwLock<HashMap<String, V>>) -> Vec<String> {
    let mut keys: Vec<String> = table
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    keys.sort();
    keys
}

#[cfg(test)]
mod tests {
    use crate::test_support::{InMemoryRemote, group_record};

    use super::*;

    #[test]
    fn put_then_get_by_full_path() {
        let instance = Instance::new(
            Role::Source,
            Scale::Small,
            Arc::new(InMemoryRemote::new("https://src")),
        );
        instance.put_group(group_record(1, "a/b"));
        assert_eq!(instance.group("a/b").unwrap().id, 1);
        assert!(instance.group("a").is_none());
    }

    #[test]
    fn refetch_overwrites_record() {
        let instance = Instance::new(
            Role::Destination,
            Scale::Big,
            Arc::new(InMemoryRemote::new("https://dst")),
        );
        instance.put_group(group_record(1, "a"));
        let mut renamed = group_record(1, "a");
        renamed.name = "Renamed".into();
        instance.put_group(renamed);
        assert_eq!(instance.group("a").unwrap().name, "Renamed");
        assert_eq!(instance.group_paths(), vec!["a".to_owned()]);
    }

    #[tokio::test]
    async fn connect_records_identity() {
        let remote = Arc::new(InMemoryRemote::new("https://src"));
        let instance = Instance::connect(Role::Source, Scale::Small, remote)
            .await
            .unwrap();
        assert_eq!(instance.identity().unwrap().username, "root");
        assert_eq!(instance.url(), "https://src");
    }
}
