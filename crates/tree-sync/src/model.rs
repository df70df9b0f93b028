use std::fmt;

/// Which side of a run an instance plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Source,
    Destination,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Destination => write!(f, "destination"),
        }
    }
}

/// Scale hint selecting the fetch strategy for an instance.
///
/// `Small` instances are listed in bulk and filtered locally; `Big`
/// instances are walked per entry from the mapped paths downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scale {
    #[default]
    Small,
    Big,
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Big => write!(f, "big"),
        }
    }
}

/// Visibility level of a group or project, ordered from least to most visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Visibility {
    #[default]
    Private,
    Internal,
    Public,
}

impl Visibility {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "private" => Some(Self::Private),
            "internal" => Some(Self::Internal),
            "public" => Some(Self::Public),
            _ => None,
        }
    }

    /// Parse an operator-supplied override, falling back to `Public` for
    /// anything unrecognised.
    pub fn parse_or_public(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            tracing::warn!(value = s, "unknown visibility, defaulting to public");
            Self::Public
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Internal => "internal",
            Self::Public => "public",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a remote resource is addressed: numeric id or full path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Id(u64),
    Path(String),
}

impl Key {
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Path(path) => f.write_str(path),
        }
    }
}

/// A group as observed on a remote instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub full_path: String,
    pub description: String,
    pub visibility: Visibility,
    pub avatar_url: Option<String>,
    pub parent_id: Option<u64>,
}

/// A project as observed on a remote instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRecord {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub full_path: String,
    pub description: String,
    pub visibility: Visibility,
    pub default_branch: Option<String>,
    pub avatar_url: Option<String>,
    pub topics: Vec<String>,
    pub namespace_id: u64,
    pub http_url: String,
    /// True when the project is configured as a pull mirror.
    pub mirror: bool,
    pub mirror_trigger_builds: bool,
}

/// Group or project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Group,
    Project,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group => write!(f, "group"),
            Self::Project => write!(f, "project"),
        }
    }
}

/// The identity a client is authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct License {
    pub tier: String,
    pub expired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tag_name: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub iid: u64,
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
    pub closed: bool,
}

/// Attachment file carried between avatar download and upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}
