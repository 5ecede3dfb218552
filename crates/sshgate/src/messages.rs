use crate::error::ProtocolError;
use crate::wire::{WireMessage, WireReader, WireWriter};
use std::fmt;

// ---------------------------------------------------------------------------
// Discriminators
// ---------------------------------------------------------------------------

/// Control message discriminator.
///
/// Values sit in the secure-shell local-extension range (192..=255) so a
/// control frame can never be mistaken for a transport packet number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlKind {
    ExecutionRequest = 200,
    ExecutionApproved = 201,
    ExecutionDenied = 202,
    HandoffComplete = 203,
    AgentForwardingNotice = 204,
}

impl ControlKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            ControlKind::ExecutionRequest => "ExecutionRequest",
            ControlKind::ExecutionApproved => "ExecutionApproved",
            ControlKind::ExecutionDenied => "ExecutionDenied",
            ControlKind::HandoffComplete => "HandoffComplete",
            ControlKind::AgentForwardingNotice => "AgentForwardingNotice",
        }
    }
}

impl TryFrom<u8> for ControlKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            200 => Ok(ControlKind::ExecutionRequest),
            201 => Ok(ControlKind::ExecutionApproved),
            202 => Ok(ControlKind::ExecutionDenied),
            203 => Ok(ControlKind::HandoffComplete),
            204 => Ok(ControlKind::AgentForwardingNotice),
            other => Err(other),
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.as_u8())
    }
}

pub(crate) fn describe_kind(raw: &u8) -> String {
    match ControlKind::try_from(*raw) {
        Ok(kind) => kind.to_string(),
        Err(raw) => format!("unknown({raw})"),
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Ask the agent to open a session as `user` on `server` and run `command`.
///
/// An empty `command` requests an interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub user: String,
    pub command: String,
    /// Target as `host` or `host:port`.
    pub server: String,
}

impl WireMessage for ExecutionRequest {
    const KIND: ControlKind = ControlKind::ExecutionRequest;

    fn encode(&self, w: &mut WireWriter) {
        w.write_string(&self.user);
        w.write_string(&self.command);
        w.write_string(&self.server);
    }

    fn decode(r: &mut WireReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            user: r.read_string("user")?,
            command: r.read_string("command")?,
            server: r.read_string("server")?,
        })
    }
}

/// The request was accepted; the peer may open the data and transport streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionApproved;

impl WireMessage for ExecutionApproved {
    const KIND: ControlKind = ControlKind::ExecutionApproved;

    fn encode(&self, _w: &mut WireWriter) {}

    fn decode(_r: &mut WireReader) -> Result<Self, ProtocolError> {
        Ok(Self)
    }
}

/// The request was rejected; the connection will be torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionDenied;

impl WireMessage for ExecutionDenied {
    const KIND: ControlKind = ControlKind::ExecutionDenied;

    fn encode(&self, _w: &mut WireWriter) {}

    fn decode(_r: &mut WireReader) -> Result<Self, ProtocolError> {
        Ok(Self)
    }
}

/// The proxied session finished. Raw forwarding of the transport stream may
/// resume at `next_transport_byte`, counted from the first byte the agent read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffComplete {
    pub next_transport_byte: u32,
}

impl WireMessage for HandoffComplete {
    const KIND: ControlKind = ControlKind::HandoffComplete;

    fn encode(&self, w: &mut WireWriter) {
        w.write_u32(self.next_transport_byte);
    }

    fn decode(r: &mut WireReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            next_transport_byte: r.read_u32("next_transport_byte")?,
        })
    }
}

/// Sent by a forwarding helper ahead of relayed agent traffic, naming the
/// remote endpoint it is servicing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentForwardingNotice {
    pub hostname: String,
    pub port: u32,
    pub username: String,
}

impl WireMessage for AgentForwardingNotice {
    const KIND: ControlKind = ControlKind::AgentForwardingNotice;

    fn encode(&self, w: &mut WireWriter) {
        w.write_string(&self.hostname);
        w.write_u32(self.port);
        w.write_string(&self.username);
    }

    fn decode(r: &mut WireReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            hostname: r.read_string("hostname")?,
            port: r.read_u32("port")?,
            username: r.read_string("username")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn discriminators_are_stable() {
        for raw in 200u8..=204 {
            let kind = ControlKind::try_from(raw).unwrap();
            assert_eq!(kind.as_u8(), raw);
        }
        assert_eq!(ControlKind::try_from(199), Err(199));
        assert_eq!(ControlKind::try_from(205), Err(205));
    }

    #[test]
    fn execution_request_payload_layout() {
        let req = ExecutionRequest {
            user: "alice".into(),
            command: "".into(),
            server: "db1:22".into(),
        };
        let payload = req.to_payload();
        let mut expected = Vec::new();
        expected.extend_from_slice(&[0, 0, 0, 5]);
        expected.extend_from_slice(b"alice");
        expected.extend_from_slice(&[0, 0, 0, 0]);
        expected.extend_from_slice(&[0, 0, 0, 6]);
        expected.extend_from_slice(b"db1:22");
        assert_eq!(payload.as_ref(), expected.as_slice());
        assert_eq!(ExecutionRequest::from_payload(payload).unwrap(), req);
    }

    #[test]
    fn handoff_complete_is_a_bare_uint32() {
        let msg = HandoffComplete {
            next_transport_byte: 0x0102_0304,
        };
        assert_eq!(msg.to_payload().as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn empty_messages_reject_payload_bytes() {
        assert!(ExecutionApproved::from_payload(Bytes::new()).is_ok());
        let err = ExecutionDenied::from_payload(Bytes::from_static(&[0])).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Malformed {
                kind: ControlKind::ExecutionDenied,
                ..
            }
        ));
    }

    #[test]
    fn forwarding_notice_missing_username_is_malformed() {
        let mut w = WireWriter::new();
        w.write_string("bastion");
        w.write_u32(22);
        let err = AgentForwardingNotice::from_payload(w.into_bytes()).unwrap_err();
        assert!(err.to_string().contains("username"));
    }

    #[test]
    fn unknown_kind_in_error_message() {
        let err = ProtocolError::UnexpectedMessage {
            expected: ControlKind::ExecutionRequest,
            got: 17,
        };
        assert_eq!(
            err.to_string(),
            "unexpected control message unknown(17) (expecting ExecutionRequest(200))"
        );
    }
}
