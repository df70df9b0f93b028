pub mod error;
pub mod fetch;
pub mod filter;
pub mod git;
pub mod instance;
pub mod mapping;
pub mod mirror;
pub mod model;
pub mod path;
pub mod probe;
pub mod reconcile;
pub mod remote;
pub mod sync;

pub use error::{Aggregator, MultiError, SyncError};
pub use filter::{PathFilters, PathMatch};
pub use git::{BareRepo, Credentials, GitError, GitTransport};
pub use instance::Instance;
pub use mapping::{CopyOptions, Insertion, Mapping, MappingEntry, MappingFile};
pub use mirror::{MirrorEngine, MirrorJob};
pub use model::{
    AvatarFile, GroupRecord, Issue, Key, License, ProjectRecord, Release, ResourceKind, Role,
    Scale, User, Visibility,
};
pub use probe::{MirrorOverride, pull_mirror_available};
pub use reconcile::{ReconcileSummary, Reconciliation, Tally};
pub use remote::{
    GroupPatch, NewGroup, NewIssue, NewProject, Page, ProjectPatch, PullMirror, RemoteClient,
    RemoteError,
};
pub use sync::{SyncOptions, SyncReport};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
