//! `@handle` extraction for post and comment bodies.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Usernames: a letter followed by up to 17 letters, digits, `_` or `-`.
pub static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]{0,17}$").expect("hard-coded regex"));

// `\B@` rejects `mail@host`; the trailing group rejects `@bob@host` and
// handles longer than the username grammar allows.
static MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\B@([a-zA-Z][a-zA-Z0-9_-]{0,17})(?:\b[^@]|$)").expect("hard-coded regex")
});

/// Returns whether `username` matches the username grammar.
pub fn is_valid_username(username: &str) -> bool {
    USERNAME.is_match(username)
}

/// Collects the distinct handles mentioned in `text`, case preserved, in
/// order of first appearance.
pub fn collect_mentions(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    MENTION
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|handle| seen.insert(*handle))
        .map(str::to_owned)
        .collect()
}
