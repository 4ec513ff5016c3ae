//! Joining the two feed queries into threads.

use std::collections::HashMap;

use crate::model::Message;

/// A top-level message with its replies, oldest reply first.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub root: Message,
    pub replies: Vec<Message>,
}

impl Thread {
    pub fn reply_count(&self) -> usize {
        self.replies.len()
    }
}

/// Attach each reply to its root.
///
/// Roots keep the order they arrive in. Replies are sorted by creation time
/// within their thread; replies whose root is not in `main` are dropped.
pub fn build_threads(main: Vec<Message>, replies: Vec<Message>) -> Vec<Thread> {
    let mut by_parent: HashMap<String, Vec<Message>> = HashMap::new();
    for reply in replies {
        match reply.reply_to.clone() {
            Some(parent) => by_parent.entry(parent).or_default().push(reply),
            None => tracing::debug!(id = %reply.id, "reply without parent in reply list, dropping"),
        }
    }

    let threads: Vec<Thread> = main
        .into_iter()
        .map(|root| {
            let mut replies = by_parent.remove(&root.id).unwrap_or_default();
            replies.sort_by_key(|r| r.created_at);
            Thread { root, replies }
        })
        .collect();

    for (parent, orphans) in &by_parent {
        tracing::debug!(parent = %parent, count = orphans.len(), "dropping replies to unknown message");
    }

    threads
}
