use crate::codec::MAX_CONTROL_FRAME;
use crate::messages::{ControlKind, describe_kind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("control stream i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("control stream closed")]
    Closed,

    #[error("control stream closed in the middle of a frame")]
    Truncated,

    #[error("control frame of {0} bytes exceeds the {MAX_CONTROL_FRAME} byte limit")]
    FrameTooLarge(usize),

    #[error("empty control frame")]
    EmptyFrame,

    #[error("unexpected control message {} (expecting {expected})", describe_kind(.got))]
    UnexpectedMessage { expected: ControlKind, got: u8 },

    #[error("malformed {kind} payload: {reason}")]
    Malformed { kind: ControlKind, reason: String },
}

impl ProtocolError {
    pub(crate) fn malformed(kind: ControlKind, reason: impl Into<String>) -> Self {
        ProtocolError::Malformed {
            kind,
            reason: reason.into(),
        }
    }

    /// True when the peer went away rather than sending something invalid.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProtocolError::Closed | ProtocolError::Truncated)
            || matches!(self, ProtocolError::Io(e) if matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::UnexpectedEof
            ))
    }
}
