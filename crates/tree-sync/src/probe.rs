use crate::error::SyncError;
use crate::remote::{RemoteClient, RemoteError};

/// Oldest platform version exposing the pull-mirror configuration API.
pub const PULL_MIRROR_MIN_VERSION: (u64, u64, u64) = (17, 6, 0);

/// License tiers that include pull mirroring.
pub const PULL_MIRROR_TIERS: &[&str] = &["premium", "ultimate", "silver", "gold"];

/// Operator override of the license check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MirrorOverride {
    /// Trust what the destination reports.
    #[default]
    Auto,
    /// Treat the license as sufficient. The version must still qualify.
    ForceAvailable,
    /// Never use pull mirroring.
    ForceUnavailable,
}

/// Decide whether the destination can be told to pull-mirror from the
/// source, or whether repositories must be pushed at the git level.
pub async fn pull_mirror_available(
    destination: &dyn RemoteClient,
    mirror_override: MirrorOverride,
) -> Result<bool, SyncError> {
    let available = match mirror_override {
        MirrorOverride::ForceUnavailable => false,
        MirrorOverride::ForceAvailable => version_supported(destination).await?,
        MirrorOverride::Auto => {
            let (version, license) =
                tokio::join!(version_supported(destination), destination.license());
            let license = license.map_err(SyncError::Probe)?;
            let licensed = PULL_MIRROR_TIERS.contains(&license.tier.to_lowercase().as_str())
                && !license.expired;
            if !licensed {
                tracing::info!(
                    tier = %license.tier,
                    expired = license.expired,
                    "license does not cover pull mirroring"
                );
            }
            version? && licensed
        }
    };

    tracing::info!(
        url = destination.base_url(),
        available,
        ?mirror_override,
        "pull mirror capability"
    );
    Ok(available)
}

async fn version_supported(client: &dyn RemoteClient) -> Result<bool, SyncError> {
    let raw = client.platform_version().await.map_err(SyncError::Probe)?;
    let version = parse_version(&raw).ok_or_else(|| {
        SyncError::Probe(RemoteError::Parse(format!("unrecognised version {raw:?}")))
    })?;
    if version < PULL_MIRROR_MIN_VERSION {
        tracing::info!(version = %raw, "platform too old for pull mirroring");
    }
    Ok(version >= PULL_MIRROR_MIN_VERSION)
}

/// Parse `17.6.2-ee` style versions into a comparable triple.
/// Missing minor or patch components count as zero.
pub fn parse_version(raw: &str) -> Option<(u64, u64, u64)> {
    let core = raw
        .trim()
        .trim_start_matches('v')
        .split(['-', '+', ' '])
        .next()?;
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use crate::model::License;
    use crate::test_support::InMemoryRemote;

    use super::*;

    fn remote(version: &str, tier: &str, expired: bool) -> InMemoryRemote {
        let remote = InMemoryRemote::new("https://dst");
        remote.set_version(version);
        remote.set_license(License {
            tier: tier.into(),
            expired,
        });
        remote
    }

    #[test]
    fn parses_versions() {
        assert_eq!(parse_version("17.6.2-ee"), Some((17, 6, 2)));
        assert_eq!(parse_version("v18.0"), Some((18, 0, 0)));
        assert_eq!(parse_version("16"), Some((16, 0, 0)));
        assert_eq!(parse_version("banana"), None);
    }

    #[tokio::test]
    async fn new_version_with_premium_is_available() {
        let dst = remote("17.8.1-ee", "premium", false);
        assert!(pull_mirror_available(&dst, MirrorOverride::Auto).await.unwrap());
    }

    #[tokio::test]
    async fn old_version_is_unavailable() {
        let dst = remote("16.11.0-ee", "ultimate", false);
        assert!(!pull_mirror_available(&dst, MirrorOverride::Auto).await.unwrap());
    }

    #[tokio::test]
    async fn expired_or_free_license_is_unavailable() {
        let expired = remote("17.8.0", "premium", true);
        assert!(!pull_mirror_available(&expired, MirrorOverride::Auto).await.unwrap());

        let free = remote("17.8.0", "free", false);
        assert!(!pull_mirror_available(&free, MirrorOverride::Auto).await.unwrap());
    }

    #[tokio::test]
    async fn force_available_skips_license_but_not_version() {
        let dst = remote("17.8.0", "free", false);
        dst.fail_license();
        assert!(
            pull_mirror_available(&dst, MirrorOverride::ForceAvailable)
                .await
                .unwrap()
        );

        let old = remote("15.0.0", "ultimate", false);
        assert!(
            !pull_mirror_available(&old, MirrorOverride::ForceAvailable)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn force_unavailable_needs_no_queries() {
        let dst = remote("17.8.0", "ultimate", false);
        dst.fail_license();
        dst.set_version("garbage");
        assert!(
            !pull_mirror_available(&dst, MirrorOverride::ForceUnavailable)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn license_failure_is_fatal_without_override() {
        let dst = remote("17.8.0", "ultimate", false);
        dst.fail_license();
        let result = pull_mirror_available(&dst, MirrorOverride::Auto).await;
        assert!(matches!(result, Err(SyncError::Probe(_))));
    }
}
