//! TCP acceptor.
//!
//! Accepts connections and hands each one to its own task, which serves a
//! single request against the shared service registry.

use crate::connection::{handle_connection, ConnectionLimits};
use crate::registry::ServiceRegistry;
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Listen backlog
const BACKLOG: i32 = 1024;

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_loop: JoinHandle<()>,
}

/// Server instance
pub struct Server {
    listen: String,
    registry: Arc<ServiceRegistry>,
    limits: ConnectionLimits,
    connection_limit: Arc<Semaphore>,
    running: Mutex<Option<Running>>,
}

impl Server {
    /// Create a new server instance
    pub fn new(
        listen: impl Into<String>,
        registry: Arc<ServiceRegistry>,
        limits: ConnectionLimits,
        max_connections: usize,
    ) -> Self {
        Server {
            listen: listen.into(),
            registry,
            limits,
            connection_limit: Arc::new(Semaphore::new(max_connections.max(1))),
            running: Mutex::new(None),
        }
    }

    /// Bind the listener and start accepting in the background.
    ///
    /// Calling `start` on a running server returns the existing address.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> io::Result<SocketAddr> {
        let mut running = self.running.lock();
        if let Some(running) = running.as_ref() {
            return Ok(running.local_addr);
        }

        let addr: SocketAddr = self
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let listener = TcpListener::from_std(create_listener(addr)?)?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_loop = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            Arc::clone(&self.registry),
            self.limits,
            Arc::clone(&self.connection_limit),
        ));

        info!(address = %local_addr, services = self.registry.len(), "Server listening");
        *running = Some(Running {
            local_addr,
            shutdown,
            accept_loop,
        });
        Ok(local_addr)
    }

    /// Stop accepting and release the listening socket.
    ///
    /// Connections already accepted run to completion.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.accept_loop.await {
            warn!(error = %e, "Accept loop ended abnormally");
        }
        info!(address = %running.local_addr, "Server stopped");
    }

    /// Address of the listening socket while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.local_addr)
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    registry: Arc<ServiceRegistry>,
    limits: ConnectionLimits,
    connection_limit: Arc<Semaphore>,
) {
    loop {
        // Wait for a connection slot
        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = Arc::clone(&connection_limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "New connection");
                let registry = Arc::clone(&registry);

                tokio::spawn(async move {
                    match handle_connection(stream, registry, limits).await {
                        Ok(response) => {
                            debug!(peer = %peer, status = response.status(), "Connection finished")
                        }
                        Err(e) => debug!(peer = %peer, error = %e, "Connection error"),
                    }
                    drop(permit);
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Create a TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn server() -> Server {
        let registry = ServiceRegistry::builder()
            .text("/api/echo", "echo", |text| Ok(Some(text.to_string())))
            .build()
            .unwrap();
        let limits = ConnectionLimits {
            data_wait: Duration::from_millis(100),
            settle_interval: Duration::from_millis(50),
            max_connection_time: Duration::from_secs(5),
            max_request_size: 1024,
        };
        Server::new("127.0.0.1:0", Arc::new(registry), limits, 64)
    }

    async fn exchange(addr: SocketAddr, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        String::from_utf8(reply).unwrap()
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let server = server();
        let addr = server.start().unwrap();

        let reply = exchange(
            addr,
            b"POST /api/echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello",
        )
        .await;
        assert_eq!(reply, "HTTP/1.1 200 OK\r\n\r\nhello");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_path_and_silence() {
        let server = server();
        let addr = server.start().unwrap();

        let reply = exchange(addr, b"GET /nowhere HTTP/1.1\r\n\r\n").await;
        assert!(reply.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(reply.ends_with("Error 404: Not Found"));

        let reply = exchange(addr, b"").await;
        assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(reply.ends_with("Error 400: Bad Request"));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_connections() {
        let server = server();
        let addr = server.start().unwrap();

        let clients: Vec<_> = (0..16)
            .map(|i| {
                tokio::spawn(async move {
                    let body = format!("client-{}", i);
                    let request = format!(
                        "POST /api/echo HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    (body, exchange(addr, request.as_bytes()).await)
                })
            })
            .collect();

        for client in clients {
            let (body, reply) = client.await.unwrap();
            assert_eq!(reply, format!("HTTP/1.1 200 OK\r\n\r\n{}", body));
        }

        server.stop().await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_releases() {
        let server = server();
        let first = server.start().unwrap();
        let second = server.start().unwrap();
        assert_eq!(first, second);
        assert_eq!(server.local_addr(), Some(first));

        server.stop().await;
        assert_eq!(server.local_addr(), None);
        assert!(TcpStream::connect(first).await.is_err());

        // Stopping twice is harmless.
        server.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_listen_address() {
        let server = Server::new(
            "not an address",
            Arc::new(ServiceRegistry::builder().build().unwrap()),
            ConnectionLimits::default(),
            1,
        );
        assert_eq!(
            server.start().unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }
}
