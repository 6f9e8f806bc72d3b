//! Branch name validation following git's ref-format rules.
//!
//! Names arrive from configuration or from a paired code repository, so
//! they are checked before anything is handed to the VCS.

use crate::error::{SyncError, SyncResult};

const FORBIDDEN_CHARS: &[char] = &[' ', '\t', '\n', '\r', '~', '^', ':', '?', '*', '[', '\\'];

/// Validate a branch name.
///
/// ```
/// use relay_sync::names::validate_branch_name;
///
/// assert!(validate_branch_name("main").is_ok());
/// assert!(validate_branch_name("feature/auth").is_ok());
/// assert!(validate_branch_name("bad..name").is_err());
/// ```
pub fn validate_branch_name(name: &str) -> SyncResult<()> {
    let reject = |reason: String| {
        Err(SyncError::InvalidBranch {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return reject("empty".into());
    }
    if name == "@" || name.starts_with('-') {
        return reject("reserved form".into());
    }
    if let Some(ch) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c) || c.is_control()) {
        return reject(format!("forbidden character {ch:?}"));
    }
    for seq in ["..", "@{", "//"] {
        if name.contains(seq) {
            return reject(format!("contains {seq:?}"));
        }
    }
    if name.ends_with('.') || name.ends_with('/') || name.starts_with('/') {
        return reject("leading or trailing separator".into());
    }
    for component in name.split('/') {
        if component.starts_with('.') || component.ends_with(".lock") {
            return reject(format!("bad component {component:?}"));
        }
    }
    Ok(())
}
