//! Receiver Core (spec §4.3): owns the connection lifecycle -- connect,
//! the single-threaded reactor loop tying together the frame transport,
//! keep-alive timer and envelope queue, reconnect-probe-on-close, and
//! close.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures_util::{Sink, SinkExt, Stream};
use relay_wire::{Content, Envelope, Frame, Request, Response};
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::attachments::{AttachmentCipher, AttachmentTransport};
use crate::collaborators::{BlockedStore, GroupStore, SessionCipherStore, SignalingKeyCipher};
use crate::config::ReceiverConfig;
use crate::content::{self, ContentDispatcherDeps};
use crate::decryptor::{self, DecryptError, Decrypted};
use crate::error::ReceiverError;
use crate::events::{EventSink, ReceiverEvent};
use crate::keepalive::{KaState, KeepAlive, TIMEOUT_CLOSE_CODE};
use crate::queue::EnvelopeQueue;
use crate::transport;

pub struct CloseOutcome {
    pub code: u16,
    pub reason: String,
}

pub struct ReceiverCore {
    pub config: ReceiverConfig,
    pub groups: Arc<dyn GroupStore>,
    pub blocked: Arc<dyn BlockedStore>,
    pub sessions: Arc<dyn SessionCipherStore>,
    pub signaling_key: Arc<dyn SignalingKeyCipher>,
    pub attachment_transport: Arc<dyn AttachmentTransport>,
    pub attachment_cipher: Arc<dyn AttachmentCipher>,
    pub events: Arc<dyn EventSink>,
    pub http: reqwest::Client,
}

impl ReceiverCore {
    /// Runs connections until told to stop or until a post-disconnect
    /// reachability probe fails. Exactly one probe per disconnect, no
    /// backoff loop (open question iii): a relay that's actually gone
    /// should surface as a dead receiver, not spin forever.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            match self.connect_and_run(shutdown.clone()).await {
                Ok(outcome) if outcome.code == 3000 => return,
                Ok(outcome) => {
                    tracing::warn!(code = outcome.code, reason = %outcome.reason, "connection closed");
                    if !self.probe_reachable().await {
                        self.events.emit(ReceiverEvent::Error(ReceiverError::ProbeFailed(
                            "device endpoint unreachable after disconnect".into(),
                        )));
                        return;
                    }
                }
                Err(e) => {
                    self.events.emit(ReceiverEvent::Error(e));
                    if !self.probe_reachable().await {
                        return;
                    }
                }
            }
        }
    }

    async fn connect_and_run(&self, shutdown: watch::Receiver<bool>) -> Result<CloseOutcome, ReceiverError> {
        let request = build_authenticated_request(
            &self.config.relay_url,
            &self.config.username,
            &self.config.password,
        )
        .map_err(|e| ReceiverError::Transport(transport::TransportError::Ws(*e)))?;
        let (ws, _resp) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(transport::TransportError::Ws)?;
        Ok(self.run_connection(ws, shutdown).await)
    }

    fn http_base_url(&self) -> String {
        http_base_url(&self.config.relay_url)
    }

    async fn probe_reachable(&self) -> bool {
        let url = format!("{}/v1/devices/{}", self.http_base_url(), self.config.number);
        match self
            .http
            .get(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn run_connection<S>(&self, mut ws: S, mut shutdown: watch::Receiver<bool>) -> CloseOutcome
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send,
    {
        let mut ka = KeepAlive::new(self.config.keepalive_path.clone(), self.config.keepalive_disconnect);
        ka.on_open_or_inbound_frame();
        let queue = EnvelopeQueue::spawn();
        let mut table = transport::PendingTable::new();
        let mut ka_response: Option<oneshot::Receiver<Result<Response, transport::TransportError>>> = None;

        let outcome = loop {
            let ping_sleep = tokio::time::sleep_until(ka.ping_deadline());
            let ack_deadline = ka
                .ack_deadline()
                .unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(3600));
            let ack_sleep = tokio::time::sleep_until(ack_deadline);

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_ok() && *shutdown.borrow() {
                        send_close(&mut ws, 3000, "called close").await;
                        break CloseOutcome { code: 3000, reason: "called close".into() };
                    }
                }

                () = ping_sleep, if ka.state() == KaState::Armed => {
                    ka.on_ping_fired();
                    let (tx, rx) = oneshot::channel();
                    let id = table.insert(tx);
                    ka_response = Some(rx);
                    let frame = Frame::Request(Request {
                        id,
                        verb: "GET".into(),
                        path: ka.path.clone(),
                        body: vec![],
                    });
                    if let Err(e) = transport::write_frame(&mut ws, &frame).await {
                        break CloseOutcome { code: 1006, reason: e.to_string() };
                    }
                }

                () = ack_sleep, if ka.state() == KaState::AwaitingAck => {
                    ka.on_ack_timeout();
                    ka_response = None;
                    if ka.disconnect {
                        send_close(&mut ws, TIMEOUT_CLOSE_CODE, "no ack for keepalive request").await;
                        break CloseOutcome {
                            code: TIMEOUT_CLOSE_CODE,
                            reason: "no ack for keepalive request".into(),
                        };
                    }
                    ka.on_open_or_inbound_frame();
                }

                result = await_ka_response(&mut ka_response), if ka_response.is_some() => {
                    ka_response = None;
                    match result {
                        Ok(_resp) => ka.on_ack_ok(),
                        Err(transport::TransportError::BadStatus { .. }) if ka.disconnect => {
                            break CloseOutcome {
                                code: TIMEOUT_CLOSE_CODE,
                                reason: "keepalive request rejected".into(),
                            };
                        }
                        Err(_) => {}
                    }
                }

                frame = transport::read_frame(&mut ws) => {
                    match frame {
                        Err(e) => break CloseOutcome { code: 1006, reason: e.to_string() },
                        Ok(None) => break CloseOutcome { code: 1005, reason: "connection closed by peer".into() },
                        Ok(Some(f)) => {
                            ka.on_open_or_inbound_frame();
                            match f {
                                Frame::Request(req) => self.handle_inbound_request(&mut ws, req, &queue).await,
                                Frame::Response(resp) => {
                                    let id = resp.id;
                                    if !table.complete(resp) {
                                        tracing::warn!(id, "unmatched response");
                                        self.events.emit(ReceiverEvent::Error(ReceiverError::Transport(
                                            transport::TransportError::UnmatchedResponse { id },
                                        )));
                                    }
                                }
                                Frame::Unknown => tracing::debug!("unknown frame type ignored"),
                            }
                        }
                    }
                }
            }
        };

        ka.on_close();
        table.fail_all(outcome.code, &outcome.reason);
        queue.shutdown().await;
        outcome
    }

    async fn handle_inbound_request<S>(&self, ws: &mut S, req: Request, queue: &EnvelopeQueue)
    where
        S: Sink<Message, Error = WsError> + Unpin,
    {
        if req.verb != "PUT" || req.path != "/messages" {
            let _ = transport::write_frame(
                ws,
                &Frame::Response(Response {
                    id: req.id,
                    status: relay_wire::ResponseStatus(404),
                    message: "Not found".into(),
                    body: vec![],
                }),
            )
            .await;
            return;
        }

        let decrypted = self.signaling_key.decrypt(&req.body);
        let (status, message) = match &decrypted {
            Ok(_) => (200, "OK"),
            Err(_) => (500, "Bad encrypted websocket message"),
        };
        let _ = transport::write_frame(
            ws,
            &Frame::Response(Response {
                id: req.id,
                status: relay_wire::ResponseStatus(status),
                message: message.into(),
                body: vec![],
            }),
        )
        .await;

        let envelope_bytes = match decrypted {
            Ok(b) => b,
            Err(e) => {
                self.events.emit(ReceiverEvent::Error(ReceiverError::SignalingKey(e)));
                return;
            }
        };

        let envelope = match Envelope::decode(&envelope_bytes) {
            Ok(e) => e,
            Err(e) => {
                self.events.emit(ReceiverEvent::Error(ReceiverError::Envelope(e)));
                return;
            }
        };

        if self.blocked.is_blocked(&envelope.source) {
            return;
        }

        let groups = Arc::clone(&self.groups);
        let blocked = Arc::clone(&self.blocked);
        let sessions = Arc::clone(&self.sessions);
        let attachment_transport = Arc::clone(&self.attachment_transport);
        let attachment_cipher = Arc::clone(&self.attachment_cipher);
        let events = Arc::clone(&self.events);
        let self_number = self.config.number.clone();
        let self_device_id = self.config.device_id;

        let _ = queue.enqueue(async move {
            let address = relay_wire::Address::new(envelope.source.clone(), envelope.source_device);
            let cipher = sessions.cipher_for(&address);
            let result = decryptor::decrypt_envelope(&envelope, cipher.as_ref()).await;
            handle_decrypt_result(
                &envelope,
                result,
                &self_number,
                self_device_id,
                groups.as_ref(),
                blocked.as_ref(),
                sessions.as_ref(),
                attachment_transport.as_ref(),
                attachment_cipher.as_ref(),
                events.as_ref(),
            )
            .await;
        });
    }

    /// Replays an envelope that previously failed with
    /// [`ReceiverError::IncomingIdentityKey`], after the caller has
    /// resolved the identity mismatch (spec §4.5).
    pub async fn try_message_again(&self, envelope: Envelope) {
        let address = relay_wire::Address::new(envelope.source.clone(), envelope.source_device);
        let cipher = self.sessions.cipher_for(&address);
        let result = decryptor::decrypt_envelope(&envelope, cipher.as_ref()).await;
        handle_decrypt_result(
            &envelope,
            result,
            &self.config.number,
            self.config.device_id,
            self.groups.as_ref(),
            self.blocked.as_ref(),
            self.sessions.as_ref(),
            self.attachment_transport.as_ref(),
            self.attachment_cipher.as_ref(),
            self.events.as_ref(),
        )
        .await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_decrypt_result(
    envelope: &Envelope,
    result: Result<Decrypted, DecryptError>,
    self_number: &str,
    self_device_id: u32,
    groups: &dyn GroupStore,
    blocked: &dyn BlockedStore,
    sessions: &dyn SessionCipherStore,
    attachment_transport: &dyn AttachmentTransport,
    attachment_cipher: &dyn AttachmentCipher,
    events: &dyn EventSink,
) {
    match result {
        Ok(Decrypted::Receipt) => {
            events.emit(ReceiverEvent::Receipt {
                source: envelope.source.clone(),
                timestamp: envelope.timestamp,
            });
        }
        Ok(decrypted) => {
            let content = match decrypted {
                Decrypted::Content(c) => c,
                Decrypted::LegacyDataMessage(dm) => Content {
                    data_message: Some(dm),
                    sync_message: None,
                },
                Decrypted::Receipt => unreachable!(),
            };
            let deps = ContentDispatcherDeps {
                self_number,
                self_device_id,
                groups,
                blocked,
                sessions,
                attachment_transport,
                attachment_cipher,
                events,
            };
            if let Err(e) = content::dispatch_content(envelope, content, &deps).await {
                events.emit(ReceiverEvent::Error(ReceiverError::Content(e)));
            }
        }
        Err(DecryptError::IncomingIdentityKey { identity_key, .. }) => {
            events.emit(ReceiverEvent::Error(ReceiverError::IncomingIdentityKey {
                envelope: envelope.clone(),
                identity_key,
            }));
        }
        Err(e) => {
            events.emit(ReceiverEvent::Error(ReceiverError::Decrypt(e)));
        }
    }
}

/// Derives the HTTP side-channel base URL from the WebSocket relay URL
/// (scheme swap, path stripped) -- used both for the reconnect probe and
/// for attachment fetches, which share the relay's HTTP side channel.
pub fn http_base_url(relay_url: &str) -> String {
    let https = relay_url.replacen("wss://", "https://", 1).replacen("ws://", "http://", 1);
    if let Some(scheme_end) = https.find("://") {
        let after = scheme_end + 3;
        if let Some(slash) = https[after..].find('/') {
            return https[..after + slash].to_string();
        }
    }
    https
}

/// Awaits the outstanding keep-alive request's response, if any. A
/// permanently pending future when there's nothing outstanding, so the
/// `if ka_response.is_some()` guard keeps this branch parked.
async fn await_ka_response(
    rx: &mut Option<oneshot::Receiver<Result<Response, transport::TransportError>>>,
) -> Result<Response, transport::TransportError> {
    match rx.as_mut() {
        Some(receiver) => match receiver.await {
            Ok(result) => result,
            Err(_) => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

async fn send_close<S>(ws: &mut S, code: u16, reason: &str)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_owned().into(),
    };
    let _ = ws.send(Message::Close(Some(frame))).await;
    let _ = ws.close().await;
}

/// Builds the HTTP Basic-authenticated WebSocket upgrade request the
/// relay expects on connect.
fn build_authenticated_request(
    url: &str,
    username: &str,
    password: &str,
) -> Result<tokio_tungstenite::tungstenite::http::Request<()>, Box<WsError>> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::header;
    url.into_client_request()
        .and_then(|mut r| {
            let token = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
            let hv = header::HeaderValue::from_str(&format!("Basic {token}")).map_err(|e| {
                WsError::Http(tokio_tungstenite::tungstenite::http::Response::new(Some(
                    e.to_string().into(),
                )))
            })?;
            r.headers_mut().insert(header::AUTHORIZATION, hv);
            Ok(r)
        })
        .map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_with_url(url: &str) -> ReceiverCore {
        ReceiverCore {
            config: ReceiverConfig {
                number: "+15555550123".into(),
                device_id: 1,
                relay_url: url.into(),
                username: "+15555550123".into(),
                password: "pw".into(),
                keepalive_path: "/v1/keepalive".into(),
                keepalive_disconnect: true,
            },
            groups: Arc::new(crate::collaborators::InMemoryGroupStore::new()),
            blocked: Arc::new(crate::collaborators::InMemoryBlockedStore::new()),
            sessions: Arc::new(NoopSessions),
            signaling_key: Arc::new(IdentitySignalingKey),
            attachment_transport: Arc::new(NoopTransport),
            attachment_cipher: Arc::new(NoopCipher),
            events: Arc::new(crate::events::MpscEventSink::new().0),
            http: reqwest::Client::new(),
        }
    }

    struct NoopSessions;
    impl SessionCipherStore for NoopSessions {
        fn cipher_for(&self, _address: &relay_wire::Address) -> Arc<dyn crate::collaborators::SessionCipher> {
            unimplemented!()
        }
        fn device_ids_for(&self, _number: &str) -> Vec<u32> {
            vec![]
        }
    }
    struct IdentitySignalingKey;
    impl SignalingKeyCipher for IdentitySignalingKey {
        fn decrypt(&self, body: &[u8]) -> Result<Vec<u8>, crate::collaborators::SignalingKeyError> {
            Ok(body.to_vec())
        }
    }
    struct NoopTransport;
    impl AttachmentTransport for NoopTransport {
        fn fetch<'a>(
            &'a self,
            _id: u64,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<u8>, crate::attachments::AttachmentError>> + Send + 'a>>
        {
            Box::pin(async { Ok(vec![]) })
        }
    }
    struct NoopCipher;
    impl AttachmentCipher for NoopCipher {
        fn decrypt(&self, ciphertext: &[u8], _key: &[u8]) -> Result<Vec<u8>, crate::attachments::AttachmentError> {
            Ok(ciphertext.to_vec())
        }
    }

    #[test]
    fn http_base_url_swaps_scheme_and_strips_path() {
        let core = core_with_url("wss://relay.example.org/v1/websocket/");
        assert_eq!(core.http_base_url(), "https://relay.example.org");
    }

    #[test]
    fn http_base_url_handles_plain_ws() {
        let core = core_with_url("ws://localhost:8080/v1/websocket/");
        assert_eq!(core.http_base_url(), "http://localhost:8080");
    }

    #[test]
    fn build_authenticated_request_sets_basic_auth_header() {
        let req = build_authenticated_request("wss://relay.example.org/v1/websocket/", "+1555", "pw").unwrap();
        let header = req.headers().get(tokio_tungstenite::tungstenite::http::header::AUTHORIZATION).unwrap();
        assert!(header.to_str().unwrap().starts_with("Basic "));
    }
}
