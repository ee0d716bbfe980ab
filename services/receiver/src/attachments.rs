//! Attachment fetch + decrypt, and the frame-delimited reader used to
//! stream `ContactDetails`/`GroupDetails` records out of a contacts/groups
//! sync blob (spec §4.6, §4.8).

use std::future::Future;
use std::pin::Pin;

use bytes::{Buf, Bytes};
use prost::Message;
use relay_wire::AttachmentPointer;
use thiserror::Error;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error, Clone)]
pub enum AttachmentError {
    #[error("fetching attachment failed: {0}")]
    Fetch(String),
    #[error("decrypting attachment failed: {0}")]
    Decrypt(String),
    #[error("decoding length-delimited records failed: {0}")]
    Decode(String),
}

/// `GET /attachments/<id>` over the relay HTTP side channel (spec §6).
/// The HTTP call is in scope; the decryption primitive is not (spec §1)
/// -- see [`AttachmentCipher`].
pub trait AttachmentTransport: Send + Sync {
    fn fetch<'a>(&'a self, id: u64) -> BoxFuture<'a, Result<Vec<u8>, AttachmentError>>;
}

/// The attachment decryption primitive. An external black box like the
/// session cipher and signaling-key cipher.
pub trait AttachmentCipher: Send + Sync {
    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, AttachmentError>;
}

/// Fetches and decrypts every attachment on a data message concurrently
/// (spec §4.8: attachment fetches run concurrently with each other and
/// with group reconciliation).
pub async fn fetch_all(
    transport: &dyn AttachmentTransport,
    cipher: &dyn AttachmentCipher,
    pointers: Vec<AttachmentPointer>,
) -> Vec<Result<(u64, Vec<u8>), AttachmentError>> {
    use futures_util::future::join_all;
    let futures = pointers.into_iter().map(|p| async move {
        let ciphertext = transport.fetch(p.id).await?;
        let plaintext = cipher.decrypt(&ciphertext, &p.key)?;
        Ok((p.id, plaintext))
    });
    join_all(futures).await
}

/// An HTTP Basic-authenticated implementation of [`AttachmentTransport`],
/// matching the relay's side-channel auth (spec §6).
pub struct HttpAttachmentTransport {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpAttachmentTransport {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl AttachmentTransport for HttpAttachmentTransport {
    fn fetch<'a>(&'a self, id: u64) -> BoxFuture<'a, Result<Vec<u8>, AttachmentError>> {
        Box::pin(async move {
            let url = format!("{}/attachments/{id}", self.base_url);
            let resp = self
                .client
                .get(&url)
                .basic_auth(&self.username, Some(&self.password))
                .send()
                .await
                .map_err(|e| AttachmentError::Fetch(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(AttachmentError::Fetch(format!("status {}", resp.status())));
            }
            resp.bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| AttachmentError::Fetch(e.to_string()))
        })
    }
}

/// Decodes a concatenation of length-delimited protobuf records, as used
/// for the contacts-sync and groups-sync attachment blobs.
pub fn read_length_delimited<M: Message + Default>(
    blob: &[u8],
) -> Result<Vec<M>, AttachmentError> {
    let mut cursor = Bytes::copy_from_slice(blob);
    let mut out = Vec::new();
    while cursor.has_remaining() {
        let msg = M::decode_length_delimited(&mut cursor)
            .map_err(|e| AttachmentError::Decode(e.to_string()))?;
        out.push(msg);
    }
    Ok(out)
}
