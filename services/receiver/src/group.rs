//! Group roster reconciliation and end-session teardown (spec §4.7).

use std::collections::HashSet;

use relay_wire::{GroupContext, GroupContextType};
use thiserror::Error;

use crate::collaborators::{GroupStore, SessionCipherStore};
use crate::events::GroupEvent;

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("group context carries an unknown type")]
    UnknownType,
}

pub struct ReconcileOutcome {
    pub group_event: GroupEvent,
    /// When true, the caller should clear the carrying message's body
    /// and attachments -- this context update carried no user content.
    pub meta_only: bool,
}

/// Applies one `GroupContext` update to the local roster and reports what
/// changed. Does not read or write the carrying message; the caller
/// decides what to do with `meta_only`.
pub fn reconcile(
    ctx: &GroupContext,
    source: &str,
    self_number: &str,
    groups: &dyn GroupStore,
) -> Result<ReconcileOutcome, GroupError> {
    let id = ctx.id.clone();

    match groups.get(&id) {
        None => {
            let members: HashSet<String> = if matches!(ctx.group_type, GroupContextType::Update) {
                ctx.members.iter().cloned().collect()
            } else {
                tracing::warn!(group = ?id, "got message for unknown group");
                std::iter::once(source.to_owned()).collect()
            };
            let record = groups.upsert_members(&id, members);
            Ok(ReconcileOutcome {
                group_event: GroupEvent {
                    id,
                    name: ctx.name.clone(),
                    members: record.members.into_iter().collect(),
                    added: vec![],
                },
                meta_only: false,
            })
        }
        Some(existing) => {
            if !existing.members.contains(source) {
                tracing::warn!(group = ?id, %source, "sender is not a member of the local roster (possible race)");
            }
            match ctx.group_type {
                GroupContextType::Update => {
                    let old = existing.members;
                    let new: HashSet<String> = ctx.members.iter().cloned().collect();
                    let updated = groups.upsert_members(&id, new.clone());
                    let added: Vec<String> = new.difference(&old).cloned().collect();
                    let meta_only = !(ctx.avatar.is_none() && added.is_empty() && ctx.name.is_none());
                    Ok(ReconcileOutcome {
                        group_event: GroupEvent {
                            id,
                            name: ctx.name.clone(),
                            members: updated.members.into_iter().collect(),
                            added,
                        },
                        meta_only,
                    })
                }
                GroupContextType::Quit => {
                    if source == self_number {
                        groups.delete(&id);
                    } else {
                        groups.remove_member(&id, source);
                    }
                    Ok(ReconcileOutcome {
                        group_event: GroupEvent {
                            id,
                            name: None,
                            members: vec![],
                            added: vec![],
                        },
                        meta_only: true,
                    })
                }
                GroupContextType::Deliver => Ok(ReconcileOutcome {
                    group_event: GroupEvent {
                        id,
                        name: None,
                        members: vec![],
                        added: vec![],
                    },
                    meta_only: false,
                }),
                GroupContextType::Unknown => Err(GroupError::UnknownType),
            }
        }
    }
}

/// Tears down every session for `number` (spec §4.7's end-session flag).
/// Idempotent: a number with no stored devices is a no-op.
pub async fn end_session(number: &str, sessions: &dyn SessionCipherStore) {
    for device_id in sessions.device_ids_for(number) {
        let address = relay_wire::Address::new(number.to_owned(), device_id);
        let cipher = sessions.cipher_for(&address);
        if let Err(e) = cipher.close_session().await {
            tracing::warn!(%address, error = %e, "failed to close session during end-session teardown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryGroupStore;

    fn ctx(group_type: GroupContextType, members: Vec<&str>, name: Option<&str>) -> GroupContext {
        GroupContext {
            id: vec![1, 2, 3],
            group_type,
            name: name.map(str::to_owned),
            avatar: None,
            members: members.into_iter().map(str::to_owned).collect(),
        }
    }

    #[test]
    fn update_on_unknown_group_creates_it_with_full_member_list() {
        let store = InMemoryGroupStore::new();
        let outcome = reconcile(
            &ctx(GroupContextType::Update, vec!["a", "b"], Some("Team")),
            "a",
            "self",
            &store,
        )
        .unwrap();
        let mut members = outcome.group_event.members;
        members.sort();
        assert_eq!(members, vec!["a", "b"]);
        assert!(outcome.group_event.added.is_empty());
    }

    #[test]
    fn deliver_on_unknown_group_creates_it_with_sender_only() {
        let store = InMemoryGroupStore::new();
        let outcome = reconcile(&ctx(GroupContextType::Deliver, vec![], None), "a", "self", &store).unwrap();
        assert_eq!(store.get(&[1, 2, 3]).unwrap().members, HashSet::from(["a".to_owned()]));
        assert!(!outcome.meta_only);
    }

    #[test]
    fn update_with_new_members_reports_them_as_added() {
        let store = InMemoryGroupStore::new();
        store.seed(vec![1, 2, 3], HashSet::from(["a".to_owned()]));
        let outcome = reconcile(
            &ctx(GroupContextType::Update, vec!["a", "b", "c"], None),
            "a",
            "self",
            &store,
        )
        .unwrap();
        let mut added = outcome.group_event.added;
        added.sort();
        assert_eq!(added, vec!["b", "c"]);
        assert!(outcome.meta_only);
    }

    #[test]
    fn update_with_no_roster_change_and_no_metadata_is_not_meta_only() {
        let store = InMemoryGroupStore::new();
        store.seed(vec![1, 2, 3], HashSet::from(["a".to_owned()]));
        let outcome = reconcile(
            &ctx(GroupContextType::Update, vec!["a"], None),
            "a",
            "self",
            &store,
        )
        .unwrap();
        assert!(!outcome.meta_only);
    }

    #[test]
    fn quit_from_self_deletes_the_group() {
        let store = InMemoryGroupStore::new();
        store.seed(vec![1, 2, 3], HashSet::from(["self".to_owned(), "a".to_owned()]));
        let outcome = reconcile(&ctx(GroupContextType::Quit, vec![], None), "self", "self", &store).unwrap();
        assert!(store.get(&[1, 2, 3]).is_none());
        assert!(outcome.meta_only);
    }

    #[test]
    fn quit_from_another_member_removes_only_that_member() {
        let store = InMemoryGroupStore::new();
        store.seed(vec![1, 2, 3], HashSet::from(["self".to_owned(), "a".to_owned()]));
        reconcile(&ctx(GroupContextType::Quit, vec![], None), "a", "self", &store).unwrap();
        assert_eq!(store.get(&[1, 2, 3]).unwrap().members, HashSet::from(["self".to_owned()]));
    }

    #[test]
    fn unknown_type_on_existing_group_fails() {
        let store = InMemoryGroupStore::new();
        store.seed(vec![1, 2, 3], HashSet::from(["a".to_owned()]));
        let err = reconcile(&ctx(GroupContextType::Unknown, vec![], None), "a", "self", &store).unwrap_err();
        assert!(matches!(err, GroupError::UnknownType));
    }
}
