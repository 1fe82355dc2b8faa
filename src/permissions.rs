//! The zone-and-namefolder permission filter (C3) and the seams for the
//! identity and permission-decision authority that are owned by external
//! collaborators.

use async_trait::async_trait;

use crate::domain::{CORE_ZONE, GREENROOM_ZONE};
use crate::path_codec;

/// The claims a decoded access token would carry. Decoding the token
/// itself is out of scope here; callers of this crate's handlers are
/// expected to have already resolved one of these.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub username: String,
}

/// Stands in for the external `has_permission` decision service.
#[async_trait]
pub trait PermissionAuthority: Send + Sync {
    async fn has_permission(
        &self,
        project_code: &str,
        permission: &str,
        zone_name: &str,
        action: &str,
        identity: &CallerIdentity,
    ) -> anyhow::Result<bool>;
}

/// A permission authority that always returns a fixed answer; useful for
/// wiring up a service instance before the real authority is available.
pub struct AlwaysAllow;

#[async_trait]
impl PermissionAuthority for AlwaysAllow {
    async fn has_permission(
        &self,
        _project_code: &str,
        _permission: &str,
        _zone_name: &str,
        _action: &str,
        _identity: &CallerIdentity,
    ) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// The two zone-scoped capabilities consulted for every listing.
const FILE_ANY: &str = "file_any";
const FILE_IN_OWN_NAMEFOLDER: &str = "file_in_own_namefolder";

fn zone_name(zone: i32) -> &'static str {
    if zone == CORE_ZONE {
        "core"
    } else {
        "greenroom"
    }
}

/// A single zone's permission outcome for an item listing: whether to
/// deny the zone outright, or to additionally require `location LIKE
/// own-namefolder%` (or `name = username` in namefolder-level mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneFilter {
    /// `file_any` granted: no extra restriction for this zone.
    Unrestricted,
    /// Neither capability granted: exclude this zone entirely.
    Denied,
    /// Only `file_in_own_namefolder` granted: restrict to the caller's
    /// own name-folder subtree (or name, in name-folder-level listings).
    OwnNamefolderOnly,
}

/// Which location column the permission filter should constrain, derived
/// derived from the rule: `restore_path` for ARCHIVED listings,
/// `parent_path` otherwise, and a degenerate "name-folder level" mode
/// when the listing has neither and is non-recursive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationMode {
    ParentPath,
    RestorePath,
    NameFolderLevel,
}

pub fn location_mode(is_archived: bool, has_parent_path: bool, has_restore_path: bool, recursive: bool) -> LocationMode {
    if is_archived {
        LocationMode::RestorePath
    } else if !has_parent_path && !has_restore_path && !recursive {
        LocationMode::NameFolderLevel
    } else {
        LocationMode::ParentPath
    }
}

/// Resolves the per-zone filter the caller is subject to for a single
/// zone, by consulting the permission authority for both capabilities.
/// Dataset containers bypass this filter entirely (checked by the
/// caller before invoking this).
pub async fn resolve_zone_filter(
    authority: &dyn PermissionAuthority,
    project_code: &str,
    zone: i32,
    identity: &CallerIdentity,
) -> anyhow::Result<ZoneFilter> {
    let zone_str = zone_name(zone);
    if authority
        .has_permission(project_code, FILE_ANY, zone_str, "view", identity)
        .await?
    {
        return Ok(ZoneFilter::Unrestricted);
    }
    if authority
        .has_permission(project_code, FILE_IN_OWN_NAMEFOLDER, zone_str, "view", identity)
        .await?
    {
        return Ok(ZoneFilter::OwnNamefolderOnly);
    }
    Ok(ZoneFilter::Denied)
}

/// The own-namefolder lquery pattern: `<encoded username>.*`.
pub fn own_namefolder_pattern(username: &str) -> String {
    format!("{}.*", path_codec::encode_label(username))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_mode_prefers_restore_path_when_archived() {
        assert_eq!(location_mode(true, true, true, true), LocationMode::RestorePath);
    }

    #[test]
    fn location_mode_degenerates_to_namefolder_level() {
        assert_eq!(
            location_mode(false, false, false, false),
            LocationMode::NameFolderLevel
        );
    }

    #[test]
    fn location_mode_is_parent_path_otherwise() {
        assert_eq!(location_mode(false, true, false, false), LocationMode::ParentPath);
        assert_eq!(location_mode(false, false, false, true), LocationMode::ParentPath);
    }

    #[tokio::test]
    async fn resolve_zone_filter_prefers_file_any() {
        struct Authority;
        #[async_trait]
        impl PermissionAuthority for Authority {
            async fn has_permission(
                &self,
                _p: &str,
                permission: &str,
                _z: &str,
                _a: &str,
                _i: &CallerIdentity,
            ) -> anyhow::Result<bool> {
                Ok(permission == FILE_ANY)
            }
        }
        let identity = CallerIdentity { username: "alice".into() };
        let result = resolve_zone_filter(&Authority, "proj", CORE_ZONE, &identity)
            .await
            .unwrap();
        assert_eq!(result, ZoneFilter::Unrestricted);
    }

    #[tokio::test]
    async fn resolve_zone_filter_falls_back_to_own_namefolder() {
        struct Authority;
        #[async_trait]
        impl PermissionAuthority for Authority {
            async fn has_permission(
                &self,
                _p: &str,
                permission: &str,
                _z: &str,
                _a: &str,
                _i: &CallerIdentity,
            ) -> anyhow::Result<bool> {
                Ok(permission == FILE_IN_OWN_NAMEFOLDER)
            }
        }
        let identity = CallerIdentity { username: "alice".into() };
        let result = resolve_zone_filter(&Authority, "proj", GREENROOM_ZONE, &identity)
            .await
            .unwrap();
        assert_eq!(result, ZoneFilter::OwnNamefolderOnly);
    }

    #[tokio::test]
    async fn resolve_zone_filter_denies_by_default() {
        struct Authority;
        #[async_trait]
        impl PermissionAuthority for Authority {
            async fn has_permission(
                &self,
                _p: &str,
                _permission: &str,
                _z: &str,
                _a: &str,
                _i: &CallerIdentity,
            ) -> anyhow::Result<bool> {
                Ok(false)
            }
        }
        let identity = CallerIdentity { username: "alice".into() };
        let result = resolve_zone_filter(&Authority, "proj", CORE_ZONE, &identity)
            .await
            .unwrap();
        assert_eq!(result, ZoneFilter::Denied);
    }
}
