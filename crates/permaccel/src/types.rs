//! Core data model: principals, permission sets and validation results.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Group key used for permissions that are empty.
pub const UNKNOWN_GROUP: &str = "UNKNOWN";

/// Identity (user or service) whose permissions are checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for PrincipalId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for PrincipalId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PrincipalId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Permissions are kept in a `BTreeSet` so iteration order is canonical.
pub type PermissionSet = BTreeSet<String>;

/// Build a [`PermissionSet`] from anything string-like.
pub fn permission_set<I, S>(permissions: I) -> PermissionSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    permissions.into_iter().map(Into::into).collect()
}

/// Partition key of a permission: the text before the first `:`.
///
/// Permissions without a separator (or starting with one) form their own
/// group.
pub fn group_key(permission: &str) -> &str {
    if permission.is_empty() {
        return UNKNOWN_GROUP;
    }
    match permission.find(':') {
        Some(idx) if idx > 0 => &permission[..idx],
        _ => permission,
    }
}

/// Which path produced a [`ValidationResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationSource {
    /// Served from the cache tier.
    Cache,
    /// Predicted from hot data, not yet confirmed.
    Prediction,
    /// Answered from a permission index snapshot.
    Index,
    /// Combined from grouped validation.
    Batch,
    /// Combined from per-permission validation.
    Parallel,
    /// Produced by the authoritative validator itself.
    Authoritative,
}

impl fmt::Display for ValidationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cache => "cache",
            Self::Prediction => "prediction",
            Self::Index => "index",
            Self::Batch => "batch",
            Self::Parallel => "parallel",
            Self::Authoritative => "authoritative",
        };
        f.write_str(s)
    }
}

/// Outcome of a permission check.
///
/// Results are never mutated after construction; the `with_*` and
/// [`as_cache_hit`](Self::as_cache_hit) helpers return new values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub principal: PrincipalId,
    pub permissions: PermissionSet,
    #[serde(default)]
    pub matched: PermissionSet,
    #[serde(default)]
    pub unmatched: PermissionSet,
    #[serde(with = "time::serde::rfc3339")]
    pub validated_at: OffsetDateTime,
    /// Only present on predicted results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub source: ValidationSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
}

impl ValidationResult {
    /// Result whose validity follows from a matched/unmatched partition.
    pub fn from_partition(
        principal: PrincipalId,
        permissions: PermissionSet,
        matched: PermissionSet,
        unmatched: PermissionSet,
        source: ValidationSource,
    ) -> Self {
        Self {
            valid: unmatched.is_empty(),
            principal,
            permissions,
            matched,
            unmatched,
            validated_at: OffsetDateTime::now_utc(),
            confidence: None,
            source,
            group_key: None,
        }
    }

    /// Every requested permission granted.
    pub fn allowed(
        principal: PrincipalId,
        permissions: PermissionSet,
        source: ValidationSource,
    ) -> Self {
        let matched = permissions.clone();
        Self::from_partition(principal, permissions, matched, PermissionSet::new(), source)
    }

    /// Every requested permission denied.
    pub fn denied(
        principal: PrincipalId,
        permissions: PermissionSet,
        source: ValidationSource,
    ) -> Self {
        let unmatched = permissions.clone();
        Self::from_partition(principal, permissions, PermissionSet::new(), unmatched, source)
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_group_key(mut self, group_key: impl Into<String>) -> Self {
        self.group_key = Some(group_key.into());
        self
    }

    /// Copy of a stored result re-labelled as served from the cache.
    pub fn as_cache_hit(&self) -> Self {
        Self {
            source: ValidationSource::Cache,
            ..self.clone()
        }
    }

    /// Whether a permission is granted according to this result.
    ///
    /// A valid result grants everything it covers. An invalid result with an
    /// explicit `unmatched` set denies only those; without one it denies all.
    pub fn grants(&self, permission: &str) -> bool {
        if self.valid {
            return self.permissions.contains(permission);
        }
        if self.unmatched.is_empty() {
            return false;
        }
        self.permissions.contains(permission) && !self.unmatched.contains(permission)
    }

    /// Compares the decision (validity and sets), ignoring timestamps and source.
    pub fn same_decision(&self, other: &ValidationResult) -> bool {
        self.valid == other.valid
            && self.permissions == other.permissions
            && self.matched == other.matched
            && self.unmatched == other.unmatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_extraction() {
        assert_eq!(group_key("billing:read"), "billing");
        assert_eq!(group_key("billing:invoice:write"), "billing");
        assert_eq!(group_key("admin"), "admin");
        assert_eq!(group_key(":leading"), ":leading");
        assert_eq!(group_key(""), UNKNOWN_GROUP);
    }

    #[test]
    fn test_permission_set_is_canonical() {
        let a = permission_set(["b", "a"]);
        let b = permission_set(["a", "b"]);
        assert_eq!(a, b);
        assert_eq!(a.iter().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_from_partition_validity() {
        let result = ValidationResult::from_partition(
            PrincipalId::from(7),
            permission_set(["doc:read", "doc:write"]),
            permission_set(["doc:read"]),
            permission_set(["doc:write"]),
            ValidationSource::Index,
        );
        assert!(!result.valid);
        assert!(result.grants("doc:read"));
        assert!(!result.grants("doc:write"));
    }

    #[test]
    fn test_allowed_matches_everything() {
        let result = ValidationResult::allowed(
            PrincipalId::from(1),
            permission_set(["a", "b"]),
            ValidationSource::Authoritative,
        );
        assert!(result.valid);
        assert_eq!(result.matched, result.permissions);
        assert!(result.unmatched.is_empty());
    }

    #[test]
    fn test_denied_without_partition_grants_nothing() {
        let mut result = ValidationResult::denied(
            PrincipalId::from(1),
            permission_set(["a", "b"]),
            ValidationSource::Authoritative,
        );
        result.unmatched.clear();
        assert!(!result.grants("a"));
        assert!(!result.grants("b"));
    }

    #[test]
    fn test_as_cache_hit_keeps_decision() {
        let original = ValidationResult::allowed(
            PrincipalId::from(42),
            permission_set(["doc:read"]),
            ValidationSource::Parallel,
        );
        let hit = original.as_cache_hit();
        assert_eq!(hit.source, ValidationSource::Cache);
        assert!(hit.same_decision(&original));
    }

    #[test]
    fn test_serialization_shape() {
        let result = ValidationResult::allowed(
            PrincipalId::from(42),
            permission_set(["doc:read"]),
            ValidationSource::Parallel,
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["principal"], "42");
        assert_eq!(json["source"], "PARALLEL");
        assert!(json.get("confidence").is_none());

        let parsed: ValidationResult = serde_json::from_value(json).unwrap();
        assert!(parsed.same_decision(&result));
        assert_eq!(parsed.source, ValidationSource::Parallel);
    }
}
