//! The query shapes the feed reads through the cache.
//!
//! Main messages and replies are two independent descriptors with their own
//! cache entries; [`crate::thread::build_threads`] joins them for display.

use lectern_core::{FieldValue, FilterOperator, QueryDescriptor, SortDirection};

pub const MESSAGES: &str = "messages";
pub const USERS: &str = "users";

/// Top-level messages, newest first.
pub fn main_messages() -> QueryDescriptor {
    QueryDescriptor::new(MESSAGES)
        .filter("replyTo", FilterOperator::Eq, FieldValue::null())
        .order_by("createdAt", SortDirection::Desc)
}

/// Every reply, grouped by parent and oldest first within a parent.
///
/// The inequality on `replyTo` means it must also be the first sort key.
pub fn replies() -> QueryDescriptor {
    QueryDescriptor::new(MESSAGES)
        .filter("replyTo", FilterOperator::Ne, FieldValue::not_null())
        .order_by("replyTo", SortDirection::Asc)
        .order_by("createdAt", SortDirection::Asc)
}

/// Candidate users for mention suggestions.
pub fn mention_users(limit: usize) -> QueryDescriptor {
    QueryDescriptor::new(USERS).limit(limit)
}
