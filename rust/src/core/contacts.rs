use std::collections::BTreeMap;

use peercall_relay::{PresenceAction, PresenceEvent, PresenceMember};

use crate::state::Contact;

/// Identity to display-name roster. Identities are unique; the local
/// identity is never listed.
#[derive(Debug, Clone)]
pub(crate) struct ContactDirectory {
    local_identity: String,
    contacts: BTreeMap<String, Contact>,
}

impl ContactDirectory {
    pub(crate) fn new(local_identity: impl Into<String>) -> Self {
        Self {
            local_identity: local_identity.into(),
            contacts: BTreeMap::new(),
        }
    }

    /// Inserts or renames. Returns whether the roster changed.
    pub(crate) fn add(&mut self, contact: Contact) -> bool {
        if contact.identity.trim().is_empty() || contact.identity == self.local_identity {
            return false;
        }
        if self.contacts.get(&contact.identity) == Some(&contact) {
            return false;
        }
        self.contacts.insert(contact.identity.clone(), contact);
        true
    }

    pub(crate) fn remove(&mut self, identity: &str) -> Option<Contact> {
        self.contacts.remove(identity)
    }

    pub(crate) fn lookup(&self, identity: &str) -> Option<&Contact> {
        self.contacts.get(identity)
    }

    pub(crate) fn list(&self) -> Vec<Contact> {
        self.contacts.values().cloned().collect()
    }

    /// Applies a lobby presence change. Returns whether the roster changed.
    pub(crate) fn apply_presence(&mut self, event: &PresenceEvent) -> bool {
        match event.action {
            PresenceAction::Enter | PresenceAction::Update => {
                self.add(contact_from_member(&event.member))
            }
            PresenceAction::Leave => self.remove(&event.member.identity).is_some(),
        }
    }
}

/// Lobby members announce `{"username": ...}`; fall back to the identity.
pub(crate) fn contact_from_member(member: &PresenceMember) -> Contact {
    let display_name = member
        .data
        .get("username")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(member.identity.as_str());
    Contact::new(member.identity.clone(), display_name)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn presence(action: PresenceAction, identity: &str, username: Option<&str>) -> PresenceEvent {
        PresenceEvent {
            channel: "_lobby".to_string(),
            action,
            member: PresenceMember {
                identity: identity.to_string(),
                data: username
                    .map(|u| json!({ "username": u }))
                    .unwrap_or_else(|| json!({})),
            },
        }
    }

    #[test]
    fn presence_adds_renames_and_removes() {
        let mut dir = ContactDirectory::new("alice");
        assert!(dir.apply_presence(&presence(PresenceAction::Enter, "bob", Some("Bob"))));
        assert_eq!(dir.lookup("bob").map(|c| c.display_name.as_str()), Some("Bob"));

        assert!(!dir.apply_presence(&presence(PresenceAction::Update, "bob", Some("Bob"))));
        assert!(dir.apply_presence(&presence(PresenceAction::Update, "bob", Some("Robert"))));
        assert_eq!(dir.lookup("bob").map(|c| c.display_name.as_str()), Some("Robert"));

        assert!(dir.apply_presence(&presence(PresenceAction::Leave, "bob", None)));
        assert!(dir.lookup("bob").is_none());
        assert!(!dir.apply_presence(&presence(PresenceAction::Leave, "bob", None)));
    }

    #[test]
    fn local_identity_is_never_a_contact() {
        let mut dir = ContactDirectory::new("alice");
        assert!(!dir.apply_presence(&presence(PresenceAction::Enter, "alice", Some("Me"))));
        assert!(!dir.add(Contact::new("alice", "Alice")));
        assert!(dir.list().is_empty());
    }

    #[test]
    fn missing_username_falls_back_to_identity() {
        let mut dir = ContactDirectory::new("alice");
        dir.apply_presence(&presence(PresenceAction::Enter, "carol", None));
        assert_eq!(dir.lookup("carol"), Some(&Contact::new("carol", "carol")));
    }
}
