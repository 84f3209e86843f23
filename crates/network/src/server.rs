//! # realmd - TCP Server
//!
//! Accepts client sockets and runs one reader task and one writer task per
//! session.
//!
//! # Architecture
//!
//! ```text
//! socket --FrameCodec--> reader task --Dispatcher--> handlers
//!                                                      |
//!                                   region schedulers <+ (deferred actions)
//!                                           |
//! socket <--FrameCodec-- writer task <-- session outbound queue
//! ```
//!
//! The reader never writes to the socket and never mutates world state
//! directly. A lost socket hands the session to [`ServerContext::connection_lost`].

use futures::{SinkExt, StreamExt};
use realmd_core::{RealmError, Result};
use realmd_protocol::FrameCodec;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::context::ServerContext;
use crate::dispatcher::Dispatcher;

pub struct RealmServer {
    ctx: Arc<ServerContext>,
    dispatcher: Arc<Dispatcher>,
    listener: TcpListener,
}

impl RealmServer {
    /// Bind the configured listen address
    ///
    /// # Errors
    /// `Io` if the address cannot be bound.
    pub async fn bind(ctx: Arc<ServerContext>, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        let address = ctx.config().bind_address;
        let listener = TcpListener::bind(address).await.map_err(|e| {
            RealmError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to bind to {}: {}", address, e),
            ))
        })?;
        info!("{} listening on {}", ctx.config().name, listener.local_addr()?);
        Ok(Self {
            ctx,
            dispatcher,
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Ctrl-C received, initiating shutdown");
        })
        .await
    }

    /// Serve until `shutdown` completes, then close every session
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Server starting main loop");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => {
                            let ctx = Arc::clone(&self.ctx);
                            let dispatcher = Arc::clone(&self.dispatcher);
                            tokio::spawn(serve_connection(ctx, dispatcher, socket, addr));
                        }
                        Err(e) => warn!("Error accepting connection: {}", e),
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        info!("Closing {} sessions", self.ctx.session_count());
        self.ctx.close_all();
        self.ctx.flush_saves().await;
        let traffic = self.ctx.traffic();
        info!(
            "Served {} sessions: {} packets in ({} bytes), {} packets out ({} bytes)",
            self.ctx.sessions_total(),
            traffic.packets_in,
            traffic.bytes_in,
            traffic.packets_out,
            traffic.bytes_out
        );
        Ok(())
    }
}

/// Drive one client socket until it closes
pub async fn serve_connection(ctx: Arc<ServerContext>, dispatcher: Arc<Dispatcher>, socket: TcpStream, addr: SocketAddr) {
    let Some((session, mut outbound)) = ctx.open_session(addr) else {
        warn!("Connection from {} rejected: no session id left", addr);
        return;
    };
    if let Err(e) = socket.set_nodelay(true) {
        debug!("Cannot disable Nagle for {}: {}", addr, e);
    }
    info!("Session {} connected from {}", session.id(), addr);

    let framed = Framed::new(socket, FrameCodec::new(ctx.config().max_packet_size));
    let (mut sink, mut stream) = framed.split();

    let writer_id = session.id();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match sink.send(frame).await {
                Ok(()) => {}
                Err(RealmError::Protocol(reason)) => warn!("Session {}: frame dropped: {}", writer_id, reason),
                Err(e) => {
                    debug!("Session {} write failed: {}", writer_id, e);
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    let mut closed = session.closed_signal();
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(packet)) => {
                    if let Err(e) = dispatcher.dispatch(&ctx, &session, packet).await {
                        warn!("Dropping session {}: {}", session.id(), e);
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("Session {} stream error: {}", session.id(), e);
                    if matches!(e, RealmError::Protocol(_)) {
                        session.dump_history();
                    }
                    break;
                }
                None => {
                    debug!("Session {} closed by client", session.id());
                    break;
                }
            },
            _ = closed.changed() => break,
        }
    }

    session.close();
    ctx.connection_lost(&session);
    if let Err(e) = writer.await {
        error!("Session {} writer task failed: {}", session.id(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::build_registry;
    use crate::testkit;
    use bytes::{BufMut, BytesMut};
    use realmd_protocol::{ClientOpcode, RawPacket, ServerOpcode};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_login_over_tcp() {
        let mut config = testkit::config();
        config.bind_address = "127.0.0.1:0".parse().unwrap();
        let ctx = testkit::context(config);
        let dispatcher = Arc::new(Dispatcher::new(build_registry().unwrap(), 10));
        let server = RealmServer::bind(ctx.clone(), dispatcher).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let login = RawPacket::new(ClientOpcode::LoginRequest.wire(), 1, testkit::login_payload(1, 72, "arthur", "excalibur"));
        client.write_all(&login.to_frame()).await.unwrap();

        let mut header = [0u8; 3];
        client.read_exact(&mut header).await.unwrap();
        assert_eq!(header[2], ServerOpcode::LoginGranted.as_u8());
        let mut body = vec![0u8; u16::from_be_bytes([header[0], header[1]]) as usize];
        client.read_exact(&mut body).await.unwrap();

        // A corrupted frame drops the connection
        let mut garbage = BytesMut::new();
        garbage.put_slice(&RawPacket::new(ClientOpcode::PingRequest.wire(), 2, vec![0, 0, 0, 1]).to_frame());
        let last = garbage.len() - 1;
        garbage[last] ^= 0xFF;
        client.write_all(&garbage).await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        stop_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
        assert_eq!(ctx.session_count(), 0);
        assert!(ctx.traffic().packets_in >= 1);
    }
}
