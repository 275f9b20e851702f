//! TCP server and per-connection dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::ratelimit::{Decision, RateLimiter};

/// Fixed response sent when a request is admitted.
const ALLOW_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nRequest allowed\n";

/// Fixed response sent when a request is rejected.
const DENY_RESPONSE: &[u8] =
    b"HTTP/1.1 429 Too Many Requests\r\nContent-Type: text/plain\r\n\r\nToo many requests. Try later.\n";

/// TCP front-end that drives the rate limiter once per connection.
///
/// Each accepted connection is handled on its own task:
/// resolve the peer identifier, run the admission check (which also advances
/// the sweep counter), send the fixed allow or deny response, then close.
pub struct Server {
    /// Server settings
    config: ServerConfig,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
}

impl Server {
    /// Create a new server.
    pub fn new(config: ServerConfig, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            config,
            rate_limiter,
        }
    }

    /// Bind the TCP listener.
    ///
    /// Bind and listen failures are fatal; they propagate to the caller
    /// instead of being retried.
    pub async fn listen(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| {
                error!(addr = %self.config.listen_addr, error = %e, "Failed to bind listener");
                e
            })?;
        info!(addr = %listener.local_addr()?, "Palisade listening");
        Ok(listener)
    }

    /// Run the accept loop on an already-bound listener.
    ///
    /// Accept failures are transient: they are logged and the loop continues.
    pub async fn run(self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let rate_limiter = Arc::clone(&self.rate_limiter);
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, peer, rate_limiter, &config).await
                        {
                            debug!(peer = %peer, error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                }
            }
        }
    }

    /// Start the server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        let listener = self.listen().await?;
        self.run(listener).await
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let listener = self.listen().await?;

        tokio::select! {
            result = self.run(listener) => result,
            _ = signal => {
                info!("Shutdown signal received, stopping listener");
                Ok(())
            }
        }
    }
}

/// Handle one connection, start to finish.
///
/// Strictly one pass: identifier resolution, admission (which counts the
/// request and may trigger a sweep), response, delayed close. The payload is
/// bounded, discarded, and never parsed: the allow path reads it before
/// responding, the deny path responds first and only then drains whatever the
/// peer already sent. Both paths delay briefly before closing to slow
/// reconnect storms.
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    rate_limiter: Arc<RateLimiter>,
    config: &ServerConfig,
) -> std::io::Result<()> {
    let identifier = peer.ip().to_string();

    match rate_limiter.admit(&identifier) {
        Decision::Deny => {
            warn!(identifier = %identifier, "Request denied");
            stream.write_all(DENY_RESPONSE).await?;
            // Unread request bytes left in the receive buffer turn the close
            // into an RST, which can destroy the response before the peer
            // reads it.
            discard_payload(&mut stream, config).await;
        }
        Decision::Allow => {
            info!(identifier = %identifier, "Request allowed");
            discard_payload(&mut stream, config).await;
            stream.write_all(ALLOW_RESPONSE).await?;
        }
    }

    if config.response_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(config.response_delay_ms)).await;
    }

    // Closed on drop; no keep-alive.
    Ok(())
}

/// Read and discard a bounded prefix of the request payload.
///
/// A slow or silent peer only ties up its own task: the read is capped by the
/// configured timeout, and timing out is not an error since the bytes are
/// thrown away either way.
async fn discard_payload(stream: &mut TcpStream, config: &ServerConfig) {
    let mut buffer = vec![0u8; config.max_request_bytes];
    let read_timeout = Duration::from_millis(config.read_timeout_ms);

    match timeout(read_timeout, stream.read(&mut buffer)).await {
        Ok(Ok(n)) => trace!(bytes = n, "Discarded request payload"),
        Ok(Err(e)) => debug!(error = %e, "Payload read failed"),
        Err(_) => debug!("Payload read timed out"),
    }
}
