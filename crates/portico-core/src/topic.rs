//! Topic pattern matching.
//!
//! Patterns are dot-separated names where `*` matches exactly one
//! segment: `user.*` matches `user.created` but not
//! `user.profile.updated`, and `*` alone matches any single-segment
//! topic.

/// Check whether `pattern` matches the concrete topic `name`.
pub fn matches(pattern: &str, name: &str) -> bool {
    if pattern == name {
        return true;
    }
    if !pattern.contains('*') {
        return false;
    }

    let mut pat = pattern.split('.');
    let mut top = name.split('.');
    loop {
        match (pat.next(), top.next()) {
            (Some(p), Some(t)) => {
                if p != "*" && p != t {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}
