//! The `WebSocketMessage` envelope: every frame exchanged over the relay
//! connection is one of `Request`, `Response`, or `Unknown`.

use prost::Message;
use thiserror::Error;

use crate::wire;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: u64,
    pub verb: String,
    pub path: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseStatus(pub u32);

impl ResponseStatus {
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: u64,
    pub status: ResponseStatus,
    pub message: String,
    pub body: Vec<u8>,
}

/// A decoded `WebSocketMessage`. `Unknown` is a valid, silently-ignorable
/// frame: newer relay servers may send message kinds this client doesn't
/// understand yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Request(Request),
    Response(Response),
    Unknown,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("request frame missing id")]
    MissingRequestId,
    #[error("request frame missing verb")]
    MissingVerb,
    #[error("request frame missing path")]
    MissingPath,
    #[error("response frame missing id")]
    MissingResponseId,
    #[error("response frame missing status")]
    MissingStatus,
    #[error("request frame declared REQUEST but carries no request payload")]
    MissingRequestPayload,
    #[error("response frame declared RESPONSE but carries no response payload")]
    MissingResponsePayload,
    #[error("failed to decode protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),
}

impl Frame {
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        Frame::try_from(wire::WebSocketMessage::decode(buf)?)
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        wire::WebSocketMessage::from(self.clone()).encode_to_vec()
    }
}

impl TryFrom<wire::WebSocketMessage> for Frame {
    type Error = FrameError;

    fn try_from(msg: wire::WebSocketMessage) -> Result<Self, FrameError> {
        use wire::web_socket_message::Type as WireType;
        match msg.r#type() {
            WireType::Request => {
                let req = msg.request.ok_or(FrameError::MissingRequestPayload)?;
                Ok(Frame::Request(Request {
                    id: req.id.ok_or(FrameError::MissingRequestId)?,
                    verb: req.verb.ok_or(FrameError::MissingVerb)?,
                    path: req.path.ok_or(FrameError::MissingPath)?,
                    body: req.body.unwrap_or_default(),
                }))
            }
            WireType::Response => {
                let resp = msg.response.ok_or(FrameError::MissingResponsePayload)?;
                Ok(Frame::Response(Response {
                    id: resp.id.ok_or(FrameError::MissingResponseId)?,
                    status: ResponseStatus(resp.status.ok_or(FrameError::MissingStatus)?),
                    message: resp.message.unwrap_or_default(),
                    body: resp.body.unwrap_or_default(),
                }))
            }
            WireType::Unknown => Ok(Frame::Unknown),
        }
    }
}

impl From<Frame> for wire::WebSocketMessage {
    fn from(frame: Frame) -> Self {
        use wire::web_socket_message::Type as WireType;
        match frame {
            Frame::Request(req) => wire::WebSocketMessage {
                r#type: Some(WireType::Request as i32),
                request: Some(wire::WebSocketRequestMessage {
                    id: Some(req.id),
                    verb: Some(req.verb),
                    path: Some(req.path),
                    body: Some(req.body),
                }),
                response: None,
            },
            Frame::Response(resp) => wire::WebSocketMessage {
                r#type: Some(WireType::Response as i32),
                request: None,
                response: Some(wire::WebSocketResponseMessage {
                    id: Some(resp.id),
                    status: Some(resp.status.0),
                    message: Some(resp.message),
                    body: Some(resp.body),
                }),
            },
            Frame::Unknown => wire::WebSocketMessage {
                r#type: Some(WireType::Unknown as i32),
                request: None,
                response: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_the_wire_encoding() {
        let frame = Frame::Request(Request {
            id: 42,
            verb: "PUT".into(),
            path: "/v1/messages/+15555550123".into(),
            body: vec![1, 2, 3],
        });
        let bytes = frame.encode_to_vec();
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn response_round_trips_through_the_wire_encoding() {
        let frame = Frame::Response(Response {
            id: 7,
            status: ResponseStatus(200),
            message: "OK".into(),
            body: vec![],
        });
        let bytes = frame.encode_to_vec();
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn unknown_type_decodes_without_error() {
        let bytes = Frame::Unknown.encode_to_vec();
        assert_eq!(Frame::decode(&bytes).unwrap(), Frame::Unknown);
    }

    #[test]
    fn request_missing_verb_is_rejected() {
        let msg = wire::WebSocketMessage {
            r#type: Some(wire::web_socket_message::Type::Request as i32),
            request: Some(wire::WebSocketRequestMessage {
                id: Some(1),
                verb: None,
                path: Some("/v1/keepalive".into()),
                body: None,
            }),
            response: None,
        };
        assert!(matches!(Frame::try_from(msg), Err(FrameError::MissingVerb)));
    }

    #[test]
    fn status_2xx_is_success() {
        assert!(ResponseStatus(204).is_success());
        assert!(!ResponseStatus(404).is_success());
    }
}
