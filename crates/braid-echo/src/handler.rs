//! Echo handlers: application logic layered on top of the transport.
//!
//! The transport imposes no message framing.  The echo protocol is the
//! simplest possible one: every byte that arrives on a bidirectional stream
//! is written straight back, and the echo finishes when the peer finishes.
//! Unidirectional streams have nowhere to echo to, so they are drained and
//! counted.

use braid_core::{CloseReason, Direction, ErrorCode};
use braid_transport::{Connection, Stream, TransportError};
use tracing::{debug, info, warn};

/// Largest chunk read from a stream in one call.
pub const READ_CHUNK: usize = 16 * 1024;

/// Echoes one stream until the peer finishes it.
///
/// Returns the number of bytes handled.  Receive-only streams are drained
/// instead of echoed.
pub async fn echo_stream(stream: &Stream) -> Result<u64, TransportError> {
    let mut total = 0u64;
    while let Some(chunk) = stream.read(READ_CHUNK).await? {
        total += chunk.len() as u64;
        if stream.direction() == Direction::Bidirectional {
            stream.write_all(&chunk).await?;
        }
    }
    if stream.direction() == Direction::Bidirectional {
        stream.finish().await?;
    }
    Ok(total)
}

/// Accepts streams on `conn` and echoes each on its own task, until the
/// connection ends.
pub async fn serve_connection(conn: Connection) {
    let conn_id = conn.id();
    info!(connection_id = %conn_id, remote = %conn.remote_addr(), "serving connection");

    loop {
        let stream = match conn.accept_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(connection_id = %conn_id, error = %e, "accept loop finished");
                break;
            }
        };

        tokio::spawn(async move {
            let stream_id = stream.id();
            match echo_stream(&stream).await {
                Ok(bytes) => debug!(connection_id = %conn_id, %stream_id, bytes, "stream echoed"),
                Err(e) => match e.abort_code() {
                    Some(code) => {
                        debug!(connection_id = %conn_id, %stream_id, %code, "peer aborted stream")
                    }
                    None => {
                        warn!(connection_id = %conn_id, %stream_id, error = %e, "echo failed");
                        stream.abort(ErrorCode::NO_ERROR);
                    }
                },
            }
        });
    }

    let reason = conn.close_reason();
    match reason.and_then(CloseReason::code) {
        Some(code) => info!(connection_id = %conn_id, %code, "connection finished"),
        None => info!(connection_id = %conn_id, ?reason, "connection finished without a close code"),
    }
}

/// Sends `message` on a fresh bidirectional stream and returns the echo.
pub async fn round_trip(
    conn: &Connection,
    message: &[u8],
    limit: usize,
) -> Result<Vec<u8>, TransportError> {
    let stream = conn.open_stream(Direction::Bidirectional)?;
    stream.write_all(message).await?;
    stream.finish().await?;
    stream.read_to_end(limit).await
}
