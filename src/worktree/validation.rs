//! Pure validation functions for worktree creation. Stateless,
//! no I/O, so they're trivial to exhaustively unit test.

use crate::error::{ExplorationError, Result};
use std::path::{Component, Path};

/// A valid git ref name, approximating `git check-ref-format --branch`:
/// non-empty, no leading `-`, no `..`, no whitespace or control
/// characters, no trailing `.lock`, and not `@{`.
pub fn is_valid_branch_name(branch: &str) -> bool {
    if branch.is_empty() || branch.starts_with('-') || branch.ends_with('/') {
        return false;
    }
    if branch.contains("..") || branch.contains("@{") || branch.contains('\\') {
        return false;
    }
    if branch.ends_with(".lock") {
        return false;
    }
    if branch.chars().any(|c| c.is_whitespace() || c.is_control() || c == '~' || c == '^' || c == ':' || c == '?' || c == '*' || c == '[') {
        return false;
    }
    true
}

/// Ensures `candidate` resolves to a location inside `repo_root`, rejecting
/// any `..` component that would escape it. Does not touch the filesystem
/// (the path need not exist yet).
pub fn validate_path_within_repo(repo_root: &Path, candidate: &Path) -> Result<()> {
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ExplorationError::Validation(format!(
            "path {} contains a parent-directory component",
            candidate.display()
        )));
    }

    if candidate.is_absolute() && !candidate.starts_with(repo_root) {
        return Err(ExplorationError::Validation(format!(
            "path {} is outside repository root {}",
            candidate.display(),
            repo_root.display()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_examples() {
        assert!(is_valid_branch_name("exploration/task-1"));
        assert!(is_valid_branch_name("feature/x"));
        assert!(!is_valid_branch_name(""));
        assert!(!is_valid_branch_name("foo bar"));
        assert!(!is_valid_branch_name("foo..bar"));
        assert!(!is_valid_branch_name("-foo"));
        assert!(!is_valid_branch_name("foo.lock"));
    }

    #[test]
    fn path_traversal_rejected() {
        let root = Path::new("/repo");
        assert!(validate_path_within_repo(root, Path::new("/repo/wt-1")).is_ok());
        assert!(validate_path_within_repo(root, Path::new("/repo/../secrets")).is_err());
        assert!(validate_path_within_repo(root, Path::new("/other/wt-1")).is_err());
    }
}
