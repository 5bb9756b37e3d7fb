//! Read-only contact directory used for display names and interaction tracking.

use std::collections::HashMap;

use parking_lot::RwLock;
use roomchat_proto::message::UserId;

/// Lookup of the local user's contacts.
pub trait ContactDirectory: Send + Sync {
    /// Display name of a user: their name, falling back to their email.
    fn display_name(&self, user_id: &UserId) -> Option<String>;

    /// Email of a user, if known.
    fn email(&self, user_id: &UserId) -> Option<String>;

    /// Whether the user is in the local user's contact list.
    fn is_contact(&self, user_id: &UserId) -> bool;
}

/// One known contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// User handle.
    pub user_id: UserId,
    /// Full name, may be empty.
    pub name: String,
    /// Email address.
    pub email: String,
}

impl Contact {
    /// Creates a contact record.
    pub fn new(user_id: impl Into<UserId>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            email: email.into(),
        }
    }
}

/// In-memory [`ContactDirectory`].
#[derive(Debug, Default)]
pub struct InMemoryContacts {
    contacts: RwLock<HashMap<UserId, Contact>>,
}

impl InMemoryContacts {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a contact.
    pub fn insert(&self, contact: Contact) {
        self.contacts.write().insert(contact.user_id.clone(), contact);
    }

    /// Removes a contact.
    pub fn remove(&self, user_id: &UserId) -> Option<Contact> {
        self.contacts.write().remove(user_id)
    }
}

impl FromIterator<Contact> for InMemoryContacts {
    fn from_iter<I: IntoIterator<Item = Contact>>(iter: I) -> Self {
        let contacts = iter.into_iter().map(|c| (c.user_id.clone(), c)).collect();
        Self {
            contacts: RwLock::new(contacts),
        }
    }
}

impl ContactDirectory for InMemoryContacts {
    fn display_name(&self, user_id: &UserId) -> Option<String> {
        self.contacts.read().get(user_id).map(|c| {
            if c.name.is_empty() {
                c.email.clone()
            } else {
                c.name.clone()
            }
        })
    }

    fn email(&self, user_id: &UserId) -> Option<String> {
        self.contacts.read().get(user_id).map(|c| c.email.clone())
    }

    fn is_contact(&self, user_id: &UserId) -> bool {
        self.contacts.read().contains_key(user_id)
    }
}
