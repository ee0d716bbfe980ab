//! Frame-level read/write over the duplex relay connection, plus the
//! pending-request table used to correlate outgoing requests with their
//! eventual response (spec §4.1).
//!
//! Owned by a single task (the reactor in [`crate::receiver`]); there's
//! no `Mutex` here because nothing else ever touches it concurrently.

use std::collections::HashMap;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use rand::RngCore;
use relay_wire::{Frame, Response};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("frame: {0}")]
    Frame(#[from] relay_wire::frame::FrameError),
    #[error("connection closed: {reason}")]
    ConnectionClosed { code: u16, reason: String },
    #[error("unmatched response id={id}")]
    UnmatchedResponse { id: u64 },
    #[error("request rejected with status {status}: {message}")]
    BadStatus { status: u16, message: String },
}

/// Reads the next frame off `ws`, transparently skipping ping/pong
/// control frames. `Ok(None)` means the peer closed the connection.
pub async fn read_frame<S>(ws: &mut S) -> Result<Option<Frame>, TransportError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await {
            None => return Ok(None),
            Some(Err(e)) => return Err(TransportError::Ws(e)),
            Some(Ok(Message::Binary(data))) => return Ok(Some(Frame::decode(&data)?)),
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(_)) => continue,
        }
    }
}

pub async fn write_frame<S>(ws: &mut S, frame: &Frame) -> Result<(), TransportError>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    ws.send(Message::Binary(frame.encode_to_vec().into())).await?;
    Ok(())
}

/// Table of requests this side has sent and is waiting on a response for.
/// Ids are drawn from a CSPRNG (spec §4.1); a collision against a still-open
/// entry is vanishingly unlikely given the table's tiny size relative to
/// the 64-bit id space, so `insert` simply redraws on the rare collision.
pub struct PendingTable {
    entries: HashMap<u64, oneshot::Sender<Result<Response, TransportError>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, responder: oneshot::Sender<Result<Response, TransportError>>) -> u64 {
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.next_u64();
            if let std::collections::hash_map::Entry::Vacant(e) = self.entries.entry(id) {
                e.insert(responder);
                return id;
            }
        }
    }

    /// Completes the pending request matching `response.id`, if any.
    /// Returns `true` when a match was found and resolved.
    pub fn complete(&mut self, response: Response) -> bool {
        match self.entries.remove(&response.id) {
            Some(responder) => {
                let result = if response.status.is_success() {
                    Ok(response)
                } else {
                    Err(TransportError::BadStatus {
                        status: response.status.0 as u16,
                        message: response.message.clone(),
                    })
                };
                let _ = responder.send(result);
                true
            }
            None => false,
        }
    }

    /// Fails every still-pending request, e.g. on connection teardown.
    pub fn fail_all(&mut self, code: u16, reason: &str) {
        for (_, responder) in self.entries.drain() {
            let _ = responder.send(Err(TransportError::ConnectionClosed {
                code,
                reason: reason.to_owned(),
            }));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_wire::ResponseStatus;

    #[test]
    fn complete_resolves_a_matching_entry() {
        let mut table = PendingTable::new();
        let (tx, mut rx) = oneshot::channel();
        let id = table.insert(tx);
        let resolved = table.complete(Response {
            id,
            status: ResponseStatus(200),
            message: "OK".into(),
            body: vec![],
        });
        assert!(resolved);
        assert!(table.is_empty());
        let result = rx.try_recv().unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn complete_reports_unmatched_response() {
        let mut table = PendingTable::new();
        let resolved = table.complete(Response {
            id: 999,
            status: ResponseStatus(200),
            message: "OK".into(),
            body: vec![],
        });
        assert!(!resolved);
    }

    #[test]
    fn non_success_status_surfaces_as_bad_status_error() {
        let mut table = PendingTable::new();
        let (tx, mut rx) = oneshot::channel();
        let id = table.insert(tx);
        table.complete(Response {
            id,
            status: ResponseStatus(500),
            message: "nope".into(),
            body: vec![],
        });
        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(err, TransportError::BadStatus { status: 500, .. }));
    }

    #[test]
    fn fail_all_resolves_every_pending_entry() {
        let mut table = PendingTable::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        table.insert(tx1);
        table.insert(tx2);
        table.fail_all(3001, "no ack");
        assert!(table.is_empty());
        assert!(rx1.try_recv().unwrap().is_err());
        assert!(rx2.try_recv().unwrap().is_err());
    }
}
