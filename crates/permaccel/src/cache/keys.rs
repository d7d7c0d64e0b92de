//! Cache key construction.
//!
//! Request keys are canonical: permissions are joined in sorted order, so the
//! same set requested in any order maps to the same entry.

use crate::types::{PermissionSet, PrincipalId};

/// Common prefix of every key written by the engine.
pub const OPTIMIZATION_PREFIX: &str = "permission:optimization:";

const VALIDATION_NS: &str = "validation:";
const GROUP_NS: &str = "group:";
const SINGLE_NS: &str = "single:";
const HOT_DATA_NS: &str = "hot:";
const MATRIX_NS: &str = "matrix:";
const INDEX_NS: &str = "index:";
const PATH_NS: &str = "path:";

/// `principal:perm1,perm2,...` with permissions in sorted order.
pub fn request_id(principal: &PrincipalId, permissions: &PermissionSet) -> String {
    // BTreeSet iterates in sorted order
    let joined = permissions
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",");
    format!("{principal}:{joined}")
}

/// Key of a whole-request result.
pub fn validation_key(principal: &PrincipalId, permissions: &PermissionSet) -> String {
    format!(
        "{OPTIMIZATION_PREFIX}{VALIDATION_NS}{}",
        request_id(principal, permissions)
    )
}

/// Key of a group result. Includes the group's permissions so two requests
/// touching different members of a group never share an entry.
pub fn group_cache_key(
    principal: &PrincipalId,
    group: &str,
    permissions: &PermissionSet,
) -> String {
    let joined = permissions
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",");
    format!("{OPTIMIZATION_PREFIX}{GROUP_NS}{principal}:{group}:{joined}")
}

/// Key of a single-permission result.
pub fn single_key(principal: &PrincipalId, permission: &str) -> String {
    format!("{OPTIMIZATION_PREFIX}{SINGLE_NS}{principal}:{permission}")
}

pub fn hot_data_key(principal: &PrincipalId) -> String {
    format!("{OPTIMIZATION_PREFIX}{HOT_DATA_NS}{principal}")
}

pub fn matrix_key(principal: &PrincipalId) -> String {
    format!("{OPTIMIZATION_PREFIX}{MATRIX_NS}{principal}")
}

pub fn index_key(principal: &PrincipalId) -> String {
    format!("{OPTIMIZATION_PREFIX}{INDEX_NS}{principal}")
}

/// Key of a recorded validation path, addressed by its request id.
pub fn path_key(path_id: &str) -> String {
    format!("{OPTIMIZATION_PREFIX}{PATH_NS}{path_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::permission_set;

    #[test]
    fn test_validation_key_is_order_independent() {
        let principal = PrincipalId::from(42);
        let a = validation_key(&principal, &permission_set(["doc:write", "doc:read"]));
        let b = validation_key(&principal, &permission_set(["doc:read", "doc:write"]));
        assert_eq!(a, b);
        assert_eq!(a, "permission:optimization:validation:42:doc:read,doc:write");
    }

    #[test]
    fn test_group_key_includes_members() {
        let principal = PrincipalId::from(7);
        let a = group_cache_key(&principal, "billing", &permission_set(["billing:read"]));
        let b = group_cache_key(&principal, "billing", &permission_set(["billing:write"]));
        assert_ne!(a, b);
        assert!(a.starts_with("permission:optimization:group:7:billing:"));
    }

    #[test]
    fn test_principal_scoped_keys() {
        let principal = PrincipalId::from("svc-reporting");
        assert_eq!(
            hot_data_key(&principal),
            "permission:optimization:hot:svc-reporting"
        );
        assert_eq!(
            matrix_key(&principal),
            "permission:optimization:matrix:svc-reporting"
        );
        assert_eq!(
            index_key(&principal),
            "permission:optimization:index:svc-reporting"
        );
        assert_eq!(
            single_key(&principal, "report:export"),
            "permission:optimization:single:svc-reporting:report:export"
        );
    }
}
