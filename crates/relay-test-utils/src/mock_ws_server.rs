// mock_ws_server: A mock relay server for testing receiver clients.
//
// Accepts connections on ws://localhost:<port>, speaks the same
// length-delimited `WebSocketMessage` framing as the real relay, and hands
// each accepted connection to the test as a `MockRelayConnection` the test
// drives directly -- push an envelope, expect a keepalive ping, answer it,
// close with a given code.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use relay_wire::{Frame, Request, Response};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

#[derive(Debug, Error)]
pub enum MockRelayError {
    #[error("websocket: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("frame: {0}")]
    Frame(#[from] relay_wire::frame::FrameError),
    #[error("listener accept loop ended")]
    ListenerClosed,
}

/// A mock relay server for integration testing.
///
/// Binds to port 0 (random) and exposes the actual bound port. Each test
/// can spin up its own isolated server instance and pull connections off
/// it one at a time as its receiver-under-test connects.
pub struct MockRelayServer {
    addr: SocketAddr,
    incoming: mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockRelayServer {
    /// Start the mock server, binding to a random available port.
    pub async fn start() -> Result<Self, MockRelayError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _peer)) => {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                                let _ = tx.send(ws);
                            }
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            addr,
            incoming: rx,
            _task: task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// A `ws://` URL a receiver can dial to reach this server.
    pub fn url(&self) -> String {
        format!("ws://{}/v1/websocket/", self.addr)
    }

    /// Waits for the next incoming connection and wraps it for scripted
    /// interaction. Panics the test via `expect` upstream if the receiver
    /// never connects -- callers should bound this with a timeout.
    pub async fn accept(&mut self) -> Result<MockRelayConnection, MockRelayError> {
        let ws = self.incoming.recv().await.ok_or(MockRelayError::ListenerClosed)?;
        Ok(MockRelayConnection { ws })
    }
}

/// One accepted relay connection, driven directly by test code.
pub struct MockRelayConnection {
    ws: WebSocketStream<TcpStream>,
}

impl MockRelayConnection {
    pub async fn send_request(&mut self, req: Request) -> Result<(), MockRelayError> {
        self.send_frame(&Frame::Request(req)).await
    }

    pub async fn send_response(&mut self, resp: Response) -> Result<(), MockRelayError> {
        self.send_frame(&Frame::Response(resp)).await
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), MockRelayError> {
        self.ws.send(Message::Binary(frame.encode_to_vec().into())).await?;
        Ok(())
    }

    /// Reads the next frame, transparently skipping ping/pong control
    /// frames. `Ok(None)` means the peer closed the connection.
    pub async fn recv_frame(&mut self) -> Result<Option<Frame>, MockRelayError> {
        loop {
            match self.ws.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(MockRelayError::Ws(e)),
                Some(Ok(Message::Binary(data))) => return Ok(Some(Frame::decode(&data)?)),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Sends a `PUT /messages` request carrying a pre-encrypted envelope
    /// body, and waits for the matching response.
    pub async fn push_envelope(&mut self, id: u64, body: Vec<u8>) -> Result<Response, MockRelayError> {
        self.send_request(Request {
            id,
            verb: "PUT".into(),
            path: "/messages".into(),
            body,
        })
        .await?;
        loop {
            match self.recv_frame().await? {
                Some(Frame::Response(resp)) if resp.id == id => return Ok(resp),
                Some(_) => continue,
                None => {
                    return Err(MockRelayError::Ws(tokio_tungstenite::tungstenite::Error::ConnectionClosed))
                }
            }
        }
    }

    pub async fn close(&mut self, code: u16, reason: &str) -> Result<(), MockRelayError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        self.ws.send(Message::Close(Some(frame))).await?;
        Ok(())
    }
}
