use crate::codec::{ControlCodec, ControlPacket};
use crate::error::ProtocolError;
use crate::messages::{ControlKind, ExecutionRequest, HandoffComplete};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

/// The agent's answer to an [`ExecutionRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Denied,
}

/// Peer side of the control stream: the process that wants a session proxied.
///
/// Drives the fixed message order: send one request, read the verdict, and on
/// approval wait for the handoff offset.
pub struct ControlClient<S> {
    framed: Framed<S, ControlCodec>,
}

impl<S> ControlClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, ControlCodec),
        }
    }

    /// Send the request and wait for `ExecutionApproved` or `ExecutionDenied`.
    pub async fn request_execution(
        &mut self,
        req: &ExecutionRequest,
    ) -> Result<Verdict, ProtocolError> {
        self.framed.send(ControlPacket::from_message(req)).await?;
        let packet = self.next_packet().await?;
        match ControlKind::try_from(packet.kind) {
            Ok(ControlKind::ExecutionApproved) => Ok(Verdict::Approved),
            Ok(ControlKind::ExecutionDenied) => Ok(Verdict::Denied),
            _ => Err(ProtocolError::UnexpectedMessage {
                expected: ControlKind::ExecutionApproved,
                got: packet.kind,
            }),
        }
    }

    /// Wait for the agent to finish the proxied session.
    ///
    /// Returns the transport offset at which raw forwarding may resume. A
    /// stream that closes first means there is no safe takeover point.
    pub async fn wait_for_handoff(&mut self) -> Result<u32, ProtocolError> {
        let msg: HandoffComplete = self.next_packet().await?.into_message()?;
        Ok(msg.next_transport_byte)
    }

    async fn next_packet(&mut self) -> Result<ControlPacket, ProtocolError> {
        match self.framed.next().await {
            Some(packet) => packet,
            None => Err(ProtocolError::Closed),
        }
    }

    pub fn into_inner(self) -> S {
        self.framed.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{expect_message, write_message};
    use crate::messages::{ExecutionApproved, ExecutionDenied};
    use tokio::io::duplex;

    fn shell_request() -> ExecutionRequest {
        ExecutionRequest {
            user: "alice".into(),
            command: String::new(),
            server: "db1".into(),
        }
    }

    #[tokio::test]
    async fn approved_then_handoff() {
        let (peer, mut agent) = duplex(1024);
        let mut client = ControlClient::new(peer);

        let agent_side = tokio::spawn(async move {
            let req: ExecutionRequest = expect_message(&mut agent).await.unwrap();
            assert!(req.command.is_empty());
            write_message(&mut agent, &ExecutionApproved).await.unwrap();
            write_message(
                &mut agent,
                &HandoffComplete {
                    next_transport_byte: 1234,
                },
            )
            .await
            .unwrap();
        });

        assert_eq!(
            client.request_execution(&shell_request()).await.unwrap(),
            Verdict::Approved
        );
        assert_eq!(client.wait_for_handoff().await.unwrap(), 1234);
        agent_side.await.unwrap();
    }

    #[tokio::test]
    async fn denied_and_closed_has_no_handoff() {
        let (peer, mut agent) = duplex(1024);
        let mut client = ControlClient::new(peer);

        tokio::spawn(async move {
            let _: ExecutionRequest = expect_message(&mut agent).await.unwrap();
            write_message(&mut agent, &ExecutionDenied).await.unwrap();
        });

        assert_eq!(
            client.request_execution(&shell_request()).await.unwrap(),
            Verdict::Denied
        );
        assert!(matches!(
            client.wait_for_handoff().await,
            Err(ProtocolError::Closed)
        ));
    }
}
