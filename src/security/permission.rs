//! Permission strings and hierarchical wildcard matching.
//!
//! Permissions are dot-segmented (`filesystem.write.user.home`). A set entry
//! ending in `.*` grants everything below its prefix: `filesystem.write.*`
//! grants `filesystem.write.user.home` but not `filesystem.write` itself.
//! The bare `*` entry grants every permission.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::kernel::error::{KernelError, KernelResult};

static PERMISSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\*|[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*(\.\*)?)$").expect("static regex")
});

/// Whether `set` grants `permission`, by exact match or wildcard ancestor.
pub fn grants(set: &HashSet<String>, permission: &str) -> bool {
    if permission.is_empty() {
        return false;
    }
    if set.contains(permission) {
        return true;
    }

    let mut prefix = permission;
    while let Some(idx) = prefix.rfind('.') {
        prefix = &prefix[..idx];
        if set.contains(&format!("{prefix}.*")) {
            return true;
        }
    }
    set.contains("*")
}

/// Check a permission string's shape (used at the manifest boundary).
pub fn validate(permission: &str) -> KernelResult<()> {
    if PERMISSION_RE.is_match(permission) {
        Ok(())
    } else {
        Err(KernelError::Validation(format!(
            "malformed permission string '{permission}'"
        )))
    }
}

/// `app.launch.<appId>`
pub fn launch_permission(app_id: &str) -> String {
    format!("app.launch.{app_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_match() {
        let s = set(&["app.launch.editor"]);
        assert!(grants(&s, "app.launch.editor"));
        assert!(!grants(&s, "app.launch.files"));
    }

    #[test]
    fn wildcard_grants_descendants() {
        let s = set(&["filesystem.write.user.*"]);
        assert!(grants(&s, "filesystem.write.user.home"));
        assert!(grants(&s, "filesystem.write.user.home.deep"));
        assert!(!grants(&s, "filesystem.write.system"));
        assert!(!grants(&s, "filesystem.read.user.home"));
    }

    #[test]
    fn wildcard_does_not_grant_its_own_prefix() {
        let s = set(&["filesystem.write.*"]);
        assert!(!grants(&s, "filesystem.write"));
        assert!(grants(&s, "filesystem.write.x"));
    }

    #[test]
    fn segment_wise_not_string_prefix() {
        let s = set(&["app.*"]);
        assert!(!grants(&s, "application.launch"));
        assert!(grants(&s, "app.launch"));
    }

    #[test]
    fn global_wildcard() {
        assert!(grants(&set(&["*"]), "anything.at.all"));
    }

    #[test]
    fn empty_permission_never_granted() {
        assert!(!grants(&set(&["*", ""]), ""));
    }

    #[test]
    fn validate_shapes() {
        assert!(validate("filesystem.read.*").is_ok());
        assert!(validate("app.launch.text-editor").is_ok());
        assert!(validate("*").is_ok());
        assert!(validate("").is_err());
        assert!(validate("a..b").is_err());
        assert!(validate("a.*.b").is_err());
        assert!(validate("has space").is_err());
    }
}
