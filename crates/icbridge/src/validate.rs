//! Validation of names arriving over the IRC side.
//!
//! ICB limits nicknames, login ids and group names to twelve characters;
//! the character classes below mirror what the upstream servers accept.

/// Longest name ICB accepts for nicks, login ids and groups.
pub const NAME_MAX: usize = 12;

/// Check a nickname: 1-12 word characters or dashes.
pub fn is_valid_nick(nick: &str) -> bool {
    let len = nick.chars().count();
    (1..=NAME_MAX).contains(&len)
        && nick
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// Check a login id: 1-12 ASCII alphanumerics or dashes.
pub fn is_valid_loginid(loginid: &str) -> bool {
    (1..=NAME_MAX).contains(&loginid.len())
        && loginid.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Check a group name. Groups only carry a length restriction.
pub fn is_valid_group(group: &str) -> bool {
    (1..=NAME_MAX).contains(&group.chars().count())
}
