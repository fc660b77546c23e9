//! Per-connection request handling.
//!
//! Each connection carries exactly one request:
//! 1. Wait up to `data_wait` for the first bytes.
//! 2. Read the head until the blank line, EOF or the deadline.
//! 3. Read the body: `Content-Length` bytes when declared, otherwise until
//!    the peer goes quiet for `settle_interval` or closes its write side.
//! 4. Dispatch on the blocking pool, write the response, shut down.
//!
//! `max_connection_time` bounds steps 1 to 3 as a whole.

use crate::protocol::{RequestParser, Response};
use crate::registry::ServiceRegistry;
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, trace};

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Timing and size limits applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// How long to wait for the first bytes
    pub data_wait: Duration,
    /// Idle gap that ends a body sent without `Content-Length`
    pub settle_interval: Duration,
    /// Absolute limit on the read phase
    pub max_connection_time: Duration,
    /// Largest accepted body
    pub max_request_size: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            data_wait: Duration::from_secs(60),
            settle_interval: Duration::from_millis(100),
            max_connection_time: Duration::from_secs(60),
            max_request_size: 16 * 1024 * 1024,
        }
    }
}

/// Serve the single request carried by `stream`.
///
/// Returns the response that was written. I/O errors while reading or
/// writing are returned; errors while closing are ignored.
pub async fn handle_connection<S>(
    mut stream: S,
    registry: Arc<ServiceRegistry>,
    limits: ConnectionLimits,
) -> io::Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut parser = RequestParser::new(limits.max_request_size);
    read_request(&mut stream, &mut parser, &limits).await?;

    let response = match parser.finish() {
        Ok(request) => {
            debug!(
                method = %request.method,
                path = %request.path,
                body_len = request.body.len(),
                "Request"
            );
            match tokio::task::spawn_blocking(move || registry.dispatch(&request)).await {
                Ok(response) => response,
                Err(e) => {
                    error!(error = %e, "Dispatch task failed");
                    Response::InternalError
                }
            }
        }
        Err(e) => {
            debug!(error = %e, "Rejecting request");
            Response::BadRequest
        }
    };

    let encoded = response.encode();
    trace!(data = %String::from_utf8_lossy(&encoded), "Sending response");
    stream.write_all(&encoded).await?;
    stream.flush().await?;
    debug!(status = response.status(), "Response sent");

    if let Err(e) = stream.shutdown().await {
        trace!(error = %e, "Shutdown failed");
    }
    Ok(response)
}

/// Feed the parser until the request is complete or input stops.
async fn read_request<S>(
    stream: &mut S,
    parser: &mut RequestParser,
    limits: &ConnectionLimits,
) -> io::Result<()>
where
    S: AsyncRead + Unpin,
{
    let started = Instant::now();
    let deadline = started + limits.max_connection_time;
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    let first_wait = deadline.min(started + limits.data_wait);
    match timeout_at(first_wait, stream.read_buf(&mut buffer)).await {
        Err(_) => {
            debug!(waited_ms = limits.data_wait.as_millis() as u64, "No data received");
            return Ok(());
        }
        Ok(Ok(0)) => {
            trace!("Connection closed before any data");
            return Ok(());
        }
        Ok(Ok(_)) => feed(parser, &mut buffer),
        Ok(Err(e)) => return Err(e),
    }

    while !parser.is_done() {
        let wait_until = if parser.in_body() && parser.content_length().is_none() {
            deadline.min(Instant::now() + limits.settle_interval)
        } else {
            deadline
        };

        match timeout_at(wait_until, stream.read_buf(&mut buffer)).await {
            Err(_) => {
                if Instant::now() >= deadline {
                    debug!("Connection time limit reached");
                }
                break;
            }
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => feed(parser, &mut buffer),
            Ok(Err(e)) => return Err(e),
        }
    }

    Ok(())
}

fn feed(parser: &mut RequestParser, buffer: &mut BytesMut) {
    trace!(data = %String::from_utf8_lossy(&buffer[..]), "Received");
    parser.feed(&buffer[..]);
    buffer.clear();
}
