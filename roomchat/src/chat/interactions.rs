//! Per-contact last-interaction record, used for contact sorting.

use std::collections::HashMap;

use roomchat_proto::message::{Timestamp, UserId};

/// Most recent interaction time per contact.
#[derive(Debug, Clone, Default)]
pub struct LastInteractions {
    last: HashMap<UserId, Timestamp>,
}

impl LastInteractions {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an interaction with `user_id` at `at`.
    ///
    /// Older timestamps never overwrite newer ones. Returns `true` if the
    /// record moved forward.
    pub fn record(&mut self, user_id: UserId, at: Timestamp) -> bool {
        match self.last.get(&user_id) {
            Some(existing) if *existing >= at => false,
            _ => {
                tracing::trace!(user_id = %user_id, at = %at, "last interaction updated");
                self.last.insert(user_id, at);
                true
            }
        }
    }

    /// Last interaction with `user_id`.
    #[must_use]
    pub fn get(&self, user_id: &UserId) -> Option<Timestamp> {
        self.last.get(user_id).copied()
    }

    /// Contacts ordered by most recent interaction first.
    #[must_use]
    pub fn most_recent_first(&self) -> Vec<(UserId, Timestamp)> {
        let mut all: Vec<(UserId, Timestamp)> =
            self.last.iter().map(|(u, t)| (u.clone(), *t)).collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        all
    }
}
