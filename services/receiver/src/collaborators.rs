//! Trait seams for the primitives the receive pipeline treats as external
//! black boxes (the ratchet, the signaling-key wrap) plus the small bits
//! of local state it does own (group roster, blocked list, session table).
//!
//! None of these are persisted to disk here; callers wire in whatever
//! storage they have. In-memory reference implementations are provided
//! below for tests and for running the receiver with no external roster
//! service.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use relay_wire::Address;
use thiserror::Error;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error, Clone)]
pub enum SessionCipherError {
    #[error("unknown identity key")]
    UnknownIdentityKey { identity_key: Vec<u8> },
    #[error("{0}")]
    Other(String),
}

/// The double-ratchet session, keyed by `(number, deviceId)`. An external
/// black box (spec §1) — the receive pipeline only ever calls through
/// this trait.
pub trait SessionCipher: Send + Sync {
    fn decrypt_whisper_message<'a>(
        &'a self,
        ciphertext: &'a [u8],
    ) -> BoxFuture<'a, Result<Vec<u8>, SessionCipherError>>;

    fn decrypt_prekey_whisper_message<'a>(
        &'a self,
        ciphertext: &'a [u8],
    ) -> BoxFuture<'a, Result<Vec<u8>, SessionCipherError>>;

    fn close_session<'a>(&'a self) -> BoxFuture<'a, Result<(), SessionCipherError>>;
}

/// Resolves a `(number, deviceId)` pair to its session cipher and
/// enumerates the device ids known for a number (needed by end-session
/// teardown, spec §4.7).
pub trait SessionCipherStore: Send + Sync {
    fn cipher_for(&self, address: &Address) -> Arc<dyn SessionCipher>;
    fn device_ids_for(&self, number: &str) -> Vec<u32>;
}

#[derive(Debug, Error, Clone)]
pub enum SignalingKeyError {
    #[error("bad encrypted websocket message: {0}")]
    Invalid(String),
}

/// The symmetric wrap applied between server and client at the transport
/// layer, distinct from end-to-end session keys (see glossary). Treated
/// as an external collaborator for the same reason as the ratchet: it's a
/// crypto primitive this pipeline invokes, not one it implements.
pub trait SignalingKeyCipher: Send + Sync {
    fn decrypt(&self, body: &[u8]) -> Result<Vec<u8>, SignalingKeyError>;
}

#[derive(Debug, Clone, Default)]
pub struct GroupRecord {
    pub members: HashSet<String>,
}

/// The local group roster. Persistent storage is out of scope (spec §1);
/// this is the seam the decrypt pipeline reads/writes through.
pub trait GroupStore: Send + Sync {
    fn get(&self, id: &[u8]) -> Option<GroupRecord>;
    fn upsert_members(&self, id: &[u8], members: HashSet<String>) -> GroupRecord;
    fn remove_member(&self, id: &[u8], member: &str) -> Option<GroupRecord>;
    fn delete(&self, id: &[u8]);
}

/// The blocked-sender list. Consulted for real here, unlike the stubbed
/// `isBlocked` this pipeline was distilled from (Open Question ii).
pub trait BlockedStore: Send + Sync {
    fn is_blocked(&self, number: &str) -> bool;
    fn replace(&self, numbers: Vec<String>);
}

pub struct InMemoryGroupStore {
    groups: Mutex<HashMap<Vec<u8>, GroupRecord>>,
}

impl InMemoryGroupStore {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn seed(&self, id: Vec<u8>, members: HashSet<String>) {
        self.groups.lock().unwrap().insert(id, GroupRecord { members });
    }
}

impl Default for InMemoryGroupStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupStore for InMemoryGroupStore {
    fn get(&self, id: &[u8]) -> Option<GroupRecord> {
        self.groups.lock().unwrap().get(id).cloned()
    }

    fn upsert_members(&self, id: &[u8], members: HashSet<String>) -> GroupRecord {
        let mut guard = self.groups.lock().unwrap();
        let record = guard.entry(id.to_vec()).or_default();
        record.members = members;
        record.clone()
    }

    fn remove_member(&self, id: &[u8], member: &str) -> Option<GroupRecord> {
        let mut guard = self.groups.lock().unwrap();
        let record = guard.get_mut(id)?;
        record.members.remove(member);
        Some(record.clone())
    }

    fn delete(&self, id: &[u8]) {
        self.groups.lock().unwrap().remove(id);
    }
}

pub struct InMemoryBlockedStore {
    numbers: Mutex<HashSet<String>>,
}

impl InMemoryBlockedStore {
    pub fn new() -> Self {
        Self {
            numbers: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for InMemoryBlockedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockedStore for InMemoryBlockedStore {
    fn is_blocked(&self, number: &str) -> bool {
        self.numbers.lock().unwrap().contains(number)
    }

    fn replace(&self, numbers: Vec<String>) {
        *self.numbers.lock().unwrap() = numbers.into_iter().collect();
    }
}
