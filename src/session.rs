use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, warn};

use crate::hub::{HubHandle, SessionId};
use crate::limits;
use crate::observability;
use crate::protocol::{self, ClientMessage, ProtocolError, ServerMessage};

/// Frames are a little-endian `u32` length followed by a JSON body.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .little_endian()
        .length_field_length(4)
        .max_frame_length(limits::MAX_FRAME_LEN)
        .new_codec()
}

/// Serve one client until it disconnects or the hub stops.
pub async fn process_connection<S>(socket: S, hub: Arc<HubHandle>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, codec());
    let (session, mut outbox) = hub.connect();
    debug!(session, "session opened");

    let result = loop {
        tokio::select! {
            frame = framed.next() => {
                let Some(frame) = frame else { break Ok(()) };
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => break Err(e),
                };
                if let Err(e) = dispatch(&hub, session, &frame) {
                    warn!(session, "protocol error: {e}");
                    metrics::counter!(observability::PROTOCOL_ERRORS_TOTAL).increment(1);
                    let reply = ServerMessage::Error { message: e.to_string() };
                    if let Err(e) = send(&mut framed, &reply).await {
                        break Err(e);
                    }
                }
            }
            msg = outbox.recv() => {
                // The hub dropped the session: it is shutting down.
                let Some(msg) = msg else { break Ok(()) };
                if let Err(e) = send(&mut framed, &msg).await {
                    break Err(e);
                }
            }
        }
    };

    hub.disconnect(session);
    debug!(session, "session closed");
    result
}

fn dispatch(hub: &HubHandle, session: SessionId, frame: &[u8]) -> Result<(), ProtocolError> {
    match ClientMessage::decode(frame)? {
        ClientMessage::CreateStream {
            id,
            kind,
            service,
            options,
        } => {
            let filter = protocol::parse_service(kind, &service, &options)?;
            hub.create_stream(session, id, kind, filter);
        }
        ClientMessage::RemoveStream { id } => hub.remove_stream(session, id),
        ClientMessage::ScheduleOperations { id, operations } => {
            let operations = protocol::to_operations(&operations)?;
            hub.schedule(session, id, operations);
        }
    }
    Ok(())
}

async fn send<S>(framed: &mut Framed<S, LengthDelimitedCodec>, msg: &ServerMessage) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let body = msg
        .encode()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    framed.send(Bytes::from(body)).await
}
