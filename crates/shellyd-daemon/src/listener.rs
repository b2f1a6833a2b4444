//! Dual-port WebSocket listener.
//!
//! The plain endpoint serves `ws://host:port/ws`; when trust material is
//! available and TLS is enabled, the secured endpoint serves
//! `wss://host:port+1/ws`. Both accept the same upgrade and hand the
//! framed channel to a fresh connection state machine.

use crate::connection::{self, ConnectionDeps};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{error, info, warn};

/// Upgrade path accepted by both endpoints.
const UPGRADE_PATH: &str = "/ws";

/// Tracks live connections against the configured ceiling.
#[derive(Debug, Clone)]
pub struct ConnectionGauge {
    count: Arc<AtomicUsize>,
    max: usize,
}

impl ConnectionGauge {
    pub fn new(max: usize) -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    /// Current live connection count.
    pub fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Whether a new upgrade would exceed the ceiling.
    pub fn at_capacity(&self) -> bool {
        self.current() >= self.max
    }

    /// Claim a slot; released when the permit drops.
    pub fn acquire(&self) -> ConnectionPermit {
        self.count.fetch_add(1, Ordering::SeqCst);
        ConnectionPermit {
            count: self.count.clone(),
        }
    }
}

/// RAII slot in the connection gauge.
pub struct ConnectionPermit {
    count: Arc<AtomicUsize>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The bound listener pair.
pub struct Listener {
    plain: TcpListener,
    secured: Option<(TcpListener, tokio_rustls::TlsAcceptor)>,
    gauge: ConnectionGauge,
    deps: ConnectionDeps,
}

impl Listener {
    /// Bind the plain endpoint, and the secured endpoint when an
    /// acceptor is provided. A TLS bind failure is logged and leaves the
    /// plain endpoint serving; a plain bind failure is fatal.
    pub async fn bind(
        host: &str,
        port: u16,
        tls: Option<tokio_rustls::TlsAcceptor>,
        max_connections: usize,
        deps: ConnectionDeps,
    ) -> std::io::Result<Self> {
        let plain = TcpListener::bind((host, port)).await?;
        info!(addr = %plain.local_addr()?, "Listening (plain)");

        let secured = match tls {
            Some(acceptor) => match TcpListener::bind((host, port + 1)).await {
                Ok(listener) => {
                    info!(addr = %listener.local_addr()?, "Listening (TLS)");
                    Some((listener, acceptor))
                }
                Err(err) => {
                    warn!(port = port + 1, error = %err, "TLS endpoint bind failed; serving plain only");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            plain,
            secured,
            gauge: ConnectionGauge::new(max_connections),
            deps,
        })
    }

    /// The plain endpoint's bound address (useful with port 0 in tests).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.plain.local_addr()
    }

    /// The connection gauge.
    pub fn gauge(&self) -> ConnectionGauge {
        self.gauge.clone()
    }

    /// Accept until the shutdown signal fires.
    pub async fn run(self, shutdown: broadcast::Sender<()>) {
        let Listener {
            plain,
            secured,
            gauge,
            deps,
        } = self;

        let mut tasks = Vec::new();

        {
            let gauge = gauge.clone();
            let deps = deps.clone();
            let mut shutdown_rx = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        accepted = plain.accept() => match accepted {
                            Ok((stream, peer)) => spawn_plain(stream, peer, gauge.clone(), deps.clone()),
                            Err(err) => error!(error = %err, "Accept error on plain endpoint"),
                        },
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }));
        }

        if let Some((listener, acceptor)) = secured {
            let gauge = gauge.clone();
            let deps = deps.clone();
            let mut shutdown_rx = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        accepted = listener.accept() => match accepted {
                            Ok((stream, peer)) => {
                                spawn_tls(stream, peer, acceptor.clone(), gauge.clone(), deps.clone())
                            }
                            Err(err) => error!(error = %err, "Accept error on TLS endpoint"),
                        },
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }));
        }

        for task in tasks {
            let _ = task.await;
        }
        info!("Listener stopped");
    }
}

fn spawn_plain(stream: TcpStream, peer: SocketAddr, gauge: ConnectionGauge, deps: ConnectionDeps) {
    tokio::spawn(async move {
        upgrade_and_serve(stream, peer, gauge, deps).await;
    });
}

fn spawn_tls(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: tokio_rustls::TlsAcceptor,
    gauge: ConnectionGauge,
    deps: ConnectionDeps,
) {
    tokio::spawn(async move {
        match acceptor.accept(stream).await {
            Ok(tls_stream) => upgrade_and_serve(tls_stream, peer, gauge, deps).await,
            Err(err) => {
                // Pinning mismatches and probes land here; close and move on.
                warn!(%peer, error = %err, "TLS handshake failed");
            }
        }
    });
}

async fn upgrade_and_serve<S>(stream: S, peer: SocketAddr, gauge: ConnectionGauge, deps: ConnectionDeps)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let refuse = gauge.at_capacity();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() != UPGRADE_PATH {
            let mut not_found = ErrorResponse::new(None);
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            return Err(not_found);
        }
        if refuse {
            let mut busy = ErrorResponse::new(None);
            *busy.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            return Err(busy);
        }
        Ok(resp)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(err) => {
            warn!(%peer, error = %err, "WebSocket upgrade failed");
            return;
        }
    };

    let permit = gauge.acquire();
    info!(%peer, connections = gauge.current(), "Client connected");

    connection::handle_connection(ws, deps).await;

    drop(permit);
    info!(%peer, connections = gauge.current(), "Client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_counts_permits() {
        let gauge = ConnectionGauge::new(2);
        assert_eq!(gauge.current(), 0);
        assert!(!gauge.at_capacity());

        let a = gauge.acquire();
        let b = gauge.acquire();
        assert_eq!(gauge.current(), 2);
        assert!(gauge.at_capacity());

        drop(a);
        assert_eq!(gauge.current(), 1);
        assert!(!gauge.at_capacity());
        drop(b);
        assert_eq!(gauge.current(), 0);
    }
}
