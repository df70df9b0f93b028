//! libgit2-backed implementation of the tree-sync git transport.

use std::cell::{Cell, RefCell};
use std::path::Path;

use git2::{
    Cred, CredentialType, Direction, FetchOptions, PushOptions, ReferenceType, RemoteCallbacks,
    Repository,
};
use tree_sync::{BareRepo, Credentials, GitError, GitTransport};

/// Server-managed refs that hosting platforms refuse on push.
const HIDDEN_REF_PREFIXES: &[&str] = &[
    "refs/merge-requests/",
    "refs/pipelines/",
    "refs/keep-around/",
    "refs/environments/",
];

const MIRROR_REFSPEC: &str = "+refs/*:refs/*";

#[derive(Debug, Default, Clone, Copy)]
pub struct Git2Transport;

impl Git2Transport {
    pub fn new() -> Self {
        Self
    }
}

/// Offers the credentials once; libgit2 keeps asking otherwise.
fn callbacks<'a>(credentials: &'a Credentials, attempts: &'a Cell<u32>) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username, allowed| {
        attempts.set(attempts.get() + 1);
        if attempts.get() > 1 {
            return Err(git2::Error::from_str("credentials rejected"));
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            Cred::userpass_plaintext(&credentials.username, &credentials.token)
        } else {
            Cred::default()
        }
    });
    callbacks.transfer_progress(|stats| {
        if stats.total_objects() > 0 && stats.received_objects() == stats.total_objects() {
            tracing::trace!(
                objects = stats.total_objects(),
                bytes = stats.received_bytes(),
                "transfer complete"
            );
        }
        true
    });
    callbacks
}

fn open(repo: &BareRepo) -> Result<Repository, git2::Error> {
    Repository::open_bare(&repo.path)
}

fn is_hidden(name: &str) -> bool {
    HIDDEN_REF_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

impl GitTransport for Git2Transport {
    fn mirror_clone(
        &self,
        url: &str,
        credentials: &Credentials,
        dir: &Path,
    ) -> Result<BareRepo, GitError> {
        let clone_err = |e: git2::Error| GitError::Clone(format!("{url}: {}", e.message()));

        let repo = Repository::init_bare(dir).map_err(clone_err)?;
        let mut remote = repo
            .remote_with_fetch("origin", url, MIRROR_REFSPEC)
            .map_err(clone_err)?;

        let attempts = Cell::new(0);
        let head = {
            let connection = remote
                .connect_auth(Direction::Fetch, Some(callbacks(credentials, &attempts)), None)
                .map_err(clone_err)?;
            connection
                .default_branch()
                .ok()
                .and_then(|buf| buf.as_str().map(str::to_owned))
        };

        attempts.set(0);
        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks(credentials, &attempts));
        remote
            .fetch(&[] as &[&str], Some(&mut options), None)
            .map_err(clone_err)?;

        // Empty repositories advertise no HEAD; leave the unborn default.
        if let Some(head) = head {
            repo.set_head(&head).map_err(clone_err)?;
        }

        tracing::debug!(%url, path = %dir.display(), "mirror clone complete");
        Ok(BareRepo {
            path: dir.to_path_buf(),
        })
    }

    fn add_remote(&self, repo: &BareRepo, name: &str, url: &str) -> Result<(), GitError> {
        let remote_err = |e: git2::Error| GitError::Remote(e.message().to_owned());
        let repository = open(repo).map_err(remote_err)?;
        repository.remote(name, url).map_err(remote_err)?;
        Ok(())
    }

    fn force_push_all_refs(
        &self,
        repo: &BareRepo,
        remote: &str,
        credentials: &Credentials,
    ) -> Result<(), GitError> {
        let push_err = |e: git2::Error| GitError::Push(e.message().to_owned());
        let repository = open(repo).map_err(push_err)?;

        let mut refspecs = Vec::new();
        for reference in repository.references().map_err(push_err)? {
            let reference = reference.map_err(push_err)?;
            if reference.kind() != Some(ReferenceType::Direct) {
                continue;
            }
            let Some(name) = reference.name() else {
                continue;
            };
            if is_hidden(name) {
                tracing::trace!(reference = name, "skipping hidden ref");
                continue;
            }
            refspecs.push(format!("+{name}:{name}"));
        }

        if refspecs.is_empty() {
            tracing::debug!(remote, "nothing to push");
            return Ok(());
        }

        let rejected = RefCell::new(Vec::new());
        let attempts = Cell::new(0);
        let mut callbacks = callbacks(credentials, &attempts);
        callbacks.push_update_reference(|reference, status| {
            if let Some(message) = status {
                rejected.borrow_mut().push(format!("{reference}: {message}"));
            }
            Ok(())
        });
        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        let mut destination = repository.find_remote(remote).map_err(push_err)?;
        destination
            .push(&refspecs, Some(&mut options))
            .map_err(push_err)?;
        drop(options);

        let rejected = rejected.into_inner();
        if !rejected.is_empty() {
            return Err(GitError::Push(rejected.join("; ")));
        }

        tracing::debug!(remote, refs = refspecs.len(), "force push complete");
        Ok(())
    }

    fn read_symbolic_head(&self, repo: &BareRepo) -> Result<String, GitError> {
        let head_err = |e: git2::Error| GitError::Head(e.message().to_owned());
        let repository = open(repo).map_err(head_err)?;
        let head = repository.find_reference("HEAD").map_err(head_err)?;
        head.symbolic_target()
            .map(str::to_owned)
            .ok_or_else(|| GitError::Head("HEAD is not symbolic".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use git2::Signature;
    use tempfile::TempDir;

    /// A source repository with a `main` branch, a tag and a
    /// server-managed merge request ref.
    fn source_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let signature = Signature::now("Test User", "test@example.com").unwrap();

        let tree_id = {
            let mut index = repo.index().unwrap();
            std::fs::write(dir.path().join("README.md"), "# test").unwrap();
            index.add_path(Path::new("README.md")).unwrap();
            index.write().unwrap();
            index.write_tree().unwrap()
        };
        let tree = repo.find_tree(tree_id).unwrap();
        let commit = repo
            .commit(
                Some("refs/heads/main"),
                &signature,
                &signature,
                "initial",
                &tree,
                &[],
            )
            .unwrap();
        repo.set_head("refs/heads/main").unwrap();

        repo.reference("refs/tags/v1.0.0", commit, false, "tag")
            .unwrap();
        repo.reference("refs/merge-requests/1/head", commit, false, "mr")
            .unwrap();
        dir
    }

    fn url(dir: &TempDir) -> String {
        dir.path().to_string_lossy().into_owned()
    }

    fn credentials() -> Credentials {
        Credentials::token("unused")
    }

    #[test]
    fn mirror_clone_fetches_every_ref_and_head() {
        let source = source_repo();
        let scratch = TempDir::new().unwrap();
        let transport = Git2Transport::new();

        let repo = transport
            .mirror_clone(&url(&source), &credentials(), &scratch.path().join("repo.git"))
            .unwrap();

        let clone = Repository::open_bare(&repo.path).unwrap();
        assert!(clone.find_reference("refs/heads/main").is_ok());
        assert!(clone.find_reference("refs/tags/v1.0.0").is_ok());
        assert!(clone.find_reference("refs/merge-requests/1/head").is_ok());
        assert_eq!(transport.read_symbolic_head(&repo).unwrap(), "refs/heads/main");
    }

    #[test]
    fn force_push_skips_hidden_refs() {
        let source = source_repo();
        let scratch = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        Repository::init_bare(destination.path()).unwrap();
        let transport = Git2Transport::new();

        let repo = transport
            .mirror_clone(&url(&source), &credentials(), &scratch.path().join("repo.git"))
            .unwrap();
        transport
            .add_remote(&repo, "destination", &url(&destination))
            .unwrap();
        transport
            .force_push_all_refs(&repo, "destination", &credentials())
            .unwrap();

        let pushed = Repository::open_bare(destination.path()).unwrap();
        assert!(pushed.find_reference("refs/heads/main").is_ok());
        assert!(pushed.find_reference("refs/tags/v1.0.0").is_ok());
        assert!(pushed.find_reference("refs/merge-requests/1/head").is_err());
    }

    #[test]
    fn clone_of_missing_repository_is_a_clone_error() {
        let scratch = TempDir::new().unwrap();
        let missing = scratch.path().join("does-not-exist");

        let result = Git2Transport::new().mirror_clone(
            &missing.to_string_lossy(),
            &credentials(),
            &scratch.path().join("repo.git"),
        );

        assert!(matches!(result, Err(GitError::Clone(_))));
    }

    #[test]
    fn hidden_prefixes_match_whole_namespaces() {
        assert!(is_hidden("refs/keep-around/abc"));
        assert!(is_hidden("refs/pipelines/12"));
        assert!(!is_hidden("refs/heads/merge-requests"));
    }
}
