use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use relay_wire::{Frame, Request, Response};
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::mock_ws_server::MockRelayError;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A bare client for driving a relay connection from test code directly,
/// bypassing the receiver reactor entirely -- useful for asserting on the
/// raw frames a mock relay (or a real one, in a manual smoke test) sends.
pub struct MockRelayClient {
    ws: WsStream,
}

impl MockRelayClient {
    pub async fn connect(url: &str) -> Result<Self, MockRelayError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self { ws })
    }

    pub async fn connect_with_basic_auth(url: &str, username: &str, password: &str) -> Result<Self, MockRelayError> {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;
        let mut request = url.into_client_request()?;
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        request.headers_mut().insert(
            tokio_tungstenite::tungstenite::http::header::AUTHORIZATION,
            format!("Basic {token}").parse().expect("valid header value"),
        );
        let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
        Ok(Self { ws })
    }

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
}
