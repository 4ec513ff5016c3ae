//! `@name` mentions: detection while typing, suggestions and rendering.
//!
//! Mention tokens are ASCII word characters (`[A-Za-z0-9_]`).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::UserSummary;

/// A mention being typed at the end of the text.
static ACTIVE_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_]*)$").expect("Invalid active mention regex"));

/// A complete mention anywhere in the text.
static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_]+)").expect("Invalid mention regex"));

/// The partial name after a trailing `@`, if the text ends in one.
///
/// A bare `@` yields `Some("")`.
pub fn active_mention(text: &str) -> Option<&str> {
    ACTIVE_MENTION
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Users whose display name contains the active mention, ignoring case.
///
/// Returns at most `max` users in their original order, or none when no
/// mention is being typed.
pub fn suggest<'a>(users: &'a [UserSummary], text: &str, max: usize) -> Vec<&'a UserSummary> {
    let Some(partial) = active_mention(text) else {
        return Vec::new();
    };
    let needle = partial.to_lowercase();
    users
        .iter()
        .filter(|user| user.display_name.to_lowercase().contains(&needle))
        .take(max)
        .collect()
}

/// Replace the mention being typed before `cursor` with `@display_name `.
///
/// `cursor` is a byte offset; it is clamped to the text and moved back to a
/// character boundary. Returns the new text and the cursor placed after the
/// inserted mention. Text without an active mention before the cursor is
/// returned unchanged.
pub fn apply_mention(text: &str, cursor: usize, display_name: &str) -> (String, usize) {
    let mut cursor = cursor.min(text.len());
    while !text.is_char_boundary(cursor) {
        cursor -= 1;
    }
    let (before, after) = text.split_at(cursor);

    let Some(found) = ACTIVE_MENTION.find(before) else {
        return (text.to_string(), cursor);
    };

    let mut out = String::with_capacity(text.len() + display_name.len() + 2);
    out.push_str(&before[..found.start()]);
    out.push('@');
    out.push_str(display_name);
    out.push(' ');
    let new_cursor = out.len();
    out.push_str(after);
    (out, new_cursor)
}

/// A piece of message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Plain(&'a str),
    /// The mentioned name, without the `@`.
    Mention(&'a str),
}

/// Split `text` into plain runs and mentions, in order.
pub fn segments(text: &str) -> Vec<Segment<'_>> {
    let mut parts = Vec::new();
    let mut last = 0;
    for caps in MENTION.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > last {
            parts.push(Segment::Plain(&text[last..whole.start()]));
        }
        parts.push(Segment::Mention(name.as_str()));
        last = whole.end();
    }
    if last < text.len() {
        parts.push(Segment::Plain(&text[last..]));
    }
    parts
}
