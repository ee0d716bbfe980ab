//! Shared scaffolding for the receive-pipeline integration tests: a
//! scripted session cipher (queue per call kind, so a test can arrange
//! "first decrypt fails with an identity mismatch, the retry succeeds"),
//! an identity signaling-key cipher, and envelope/content wire-encoding
//! helpers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use prost::Message as _;
use receiver::collaborators::{SessionCipher, SessionCipherError, SessionCipherStore, SignalingKeyCipher, SignalingKeyError};
use relay_wire::{wire, Address};

pub struct ScriptedCipher {
    whisper: Mutex<VecDeque<Result<Vec<u8>, SessionCipherError>>>,
    prekey: Mutex<VecDeque<Result<Vec<u8>, SessionCipherError>>>,
}

impl ScriptedCipher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            whisper: Mutex::new(VecDeque::new()),
            prekey: Mutex::new(VecDeque::new()),
        })
    }

    pub fn push_whisper(&self, result: Result<Vec<u8>, SessionCipherError>) {
        self.whisper.lock().unwrap().push_back(result);
    }

    pub fn push_prekey(&self, result: Result<Vec<u8>, SessionCipherError>) {
        self.prekey.lock().unwrap().push_back(result);
    }
}

impl SessionCipher for ScriptedCipher {
    fn decrypt_whisper_message<'a>(
        &'a self,
        _ciphertext: &'a [u8],
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<u8>, SessionCipherError>> + Send + 'a>> {
        let next = self
            .whisper
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SessionCipherError::Other("no scripted whisper result".into())));
        Box::pin(async move { next })
    }

    fn decrypt_prekey_whisper_message<'a>(
        &'a self,
        _ciphertext: &'a [u8],
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<u8>, SessionCipherError>> + Send + 'a>> {
        let next = self
            .prekey
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SessionCipherError::Other("no scripted prekey result".into())));
        Box::pin(async move { next })
    }

    fn close_session<'a>(&'a self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), SessionCipherError>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }
}

/// Every address resolves to the same scripted cipher -- integration
/// tests here only ever exercise a single sender.
pub struct ScriptedSessionCipherStore {
    pub cipher: Arc<ScriptedCipher>,
}

impl SessionCipherStore for ScriptedSessionCipherStore {
    fn cipher_for(&self, _address: &Address) -> Arc<dyn SessionCipher> {
        Arc::clone(&self.cipher) as Arc<dyn SessionCipher>
    }

    fn device_ids_for(&self, _number: &str) -> Vec<u32> {
        vec![1]
    }
}

pub struct IdentitySignalingKey;

impl SignalingKeyCipher for IdentitySignalingKey {
    fn decrypt(&self, body: &[u8]) -> Result<Vec<u8>, SignalingKeyError> {
        Ok(body.to_vec())
    }
}

pub struct FailingSignalingKey;

impl SignalingKeyCipher for FailingSignalingKey {
    fn decrypt(&self, _body: &[u8]) -> Result<Vec<u8>, SignalingKeyError> {
        Err(SignalingKeyError::Invalid("scripted failure".into()))
    }
}

pub fn encode_ciphertext_envelope(source: &str, source_device: u32, timestamp: u64, content: Vec<u8>) -> Vec<u8> {
    wire::Envelope {
        r#type: Some(wire::envelope::Type::Ciphertext as i32),
        source: Some(source.to_owned()),
        source_device: Some(source_device),
        timestamp: Some(timestamp),
        legacy_body: None,
        content: Some(content),
    }
    .encode_to_vec()
}

pub fn encode_prekey_envelope(source: &str, source_device: u32, timestamp: u64, content: Vec<u8>) -> Vec<u8> {
    wire::Envelope {
        r#type: Some(wire::envelope::Type::PrekeyBundle as i32),
        source: Some(source.to_owned()),
        source_device: Some(source_device),
        timestamp: Some(timestamp),
        legacy_body: None,
        content: Some(content),
    }
    .encode_to_vec()
}

pub fn encode_data_message_content(body: &str, group: Option<wire::GroupContext>) -> Vec<u8> {
    wire::Content {
        data_message: Some(wire::DataMessage {
            flags: None,
            body: Some(body.to_owned()),
            attachments: vec![],
            group,
            expire_timer: None,
        }),
        sync_message: None,
    }
    .encode_to_vec()
}

pub fn padded(plaintext: &[u8]) -> Vec<u8> {
    relay_wire::pad(plaintext, 160)
}

pub struct NoopTransport;
impl receiver::attachments::AttachmentTransport for NoopTransport {
    fn fetch<'a>(
        &'a self,
        _id: u64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<u8>, receiver::attachments::AttachmentError>> + Send + 'a>>
    {
        Box::pin(async { Ok(vec![]) })
    }
}

pub struct NoopCipher;
impl receiver::attachments::AttachmentCipher for NoopCipher {
    fn decrypt(&self, ciphertext: &[u8], _key: &[u8]) -> Result<Vec<u8>, receiver::attachments::AttachmentError> {
        Ok(ciphertext.to_vec())
    }
}
