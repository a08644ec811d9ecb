//! Per-connection handler
//!
//! Drives one participant from TCP accept to close:
//!
//! 1. WebSocket upgrade (bounded by `handshake_timeout`), capturing the
//!    request URI and headers
//! 2. authentication via the [`Authenticator`] (bounded by `auth_timeout`);
//!    failure closes the socket without touching the registry
//! 3. registration and a first pairing attempt
//! 4. a loop that feeds client text into the relay service, drains the
//!    channel's outbound queue onto the socket and stops when the relay
//!    asks the channel to close
//! 5. exactly one unregister cascade when the loop ends

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderMap, Uri};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};

use crate::error::{Error, Result};
use crate::protocol::Identity;
use crate::registry::{ChannelHandle, Outbound};
use crate::relay::RelayService;
use crate::session::SessionState;

use super::auth::{Authenticator, HandshakeRequest};
use super::config::ServerConfig;

/// A single participant connection
pub struct Connection<A: Authenticator> {
    state: SessionState,
    channel: ChannelHandle,
    outbound: Option<mpsc::Receiver<Outbound>>,
    config: ServerConfig,
    authenticator: Arc<A>,
    service: Arc<RelayService>,
}

impl<A: Authenticator> Connection<A> {
    /// Create a handler for an accepted socket
    pub fn new(
        peer_addr: SocketAddr,
        config: ServerConfig,
        authenticator: Arc<A>,
        service: Arc<RelayService>,
    ) -> Self {
        let (channel, outbound) = service.open_channel();
        Self {
            state: SessionState::new(channel.connection_id(), peer_addr),
            channel,
            outbound: Some(outbound),
            config,
            authenticator,
            service,
        }
    }

    /// Process-unique id of this connection
    pub fn connection_id(&self) -> u64 {
        self.state.connection_id
    }

    /// Run the connection to completion
    pub async fn run(mut self, socket: TcpStream) -> Result<()> {
        let (mut ws, request) = self.accept(socket).await?;

        let identity = match timeout(
            self.config.auth_timeout,
            self.authenticator.authenticate(&request),
        )
        .await
        {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                self.reject(&mut ws, "authentication failed").await;
                return Err(Error::Unauthenticated);
            }
            Err(_) => {
                self.reject(&mut ws, "authentication timed out").await;
                return Err(Error::AuthTimeout);
            }
        };

        if let Err(e) = self
            .service
            .connect(identity.clone(), self.channel.clone())
            .await
        {
            self.reject(&mut ws, "registration refused").await;
            return Err(e);
        }
        self.state.register(identity.clone());
        self.service.stats().connection_opened();

        tracing::debug!(
            connection_id = self.state.connection_id,
            identity = %identity,
            peer = %self.state.peer_addr,
            "Connection registered"
        );

        let result = match self.outbound.take() {
            Some(outbound) => self.relay_loop(ws, outbound, &identity).await,
            None => Ok(()),
        };

        self.close().await;
        result
    }

    async fn accept(&self, socket: TcpStream) -> Result<(WebSocketStream<TcpStream>, HandshakeRequest)> {
        let mut captured: Option<(Uri, HeaderMap)> = None;
        let callback = |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
            captured = Some((request.uri().clone(), request.headers().clone()));
            Ok(response)
        };

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);
        ws_config.max_frame_size = Some(self.config.max_message_size);

        let ws = timeout(
            self.config.handshake_timeout,
            accept_hdr_async_with_config(socket, callback, Some(ws_config)),
        )
        .await
        .map_err(|_| Error::HandshakeTimeout)??;

        let (uri, headers) = captured.unwrap_or_default();
        Ok((ws, HandshakeRequest::new(self.state.peer_addr, uri, headers)))
    }

    async fn reject(&mut self, ws: &mut WebSocketStream<TcpStream>, reason: &str) {
        tracing::warn!(
            connection_id = self.state.connection_id,
            peer = %self.state.peer_addr,
            reason = reason,
            "Connection rejected"
        );
        self.service.stats().connection_rejected();
        self.state.close();
        let _ = ws.close(None).await;
    }

    async fn relay_loop(
        &mut self,
        ws: WebSocketStream<TcpStream>,
        mut outbound: mpsc::Receiver<Outbound>,
        identity: &Identity,
    ) -> Result<()> {
        let (mut sink, mut stream) = ws.split();
        let connection_id = self.state.connection_id;
        let close = self.channel.close_token();

        loop {
            tokio::select! {
                _ = close.cancelled() => {
                    tracing::debug!(identity = %identity, connection_id, "Close requested by relay");
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        self.state.frames_received += 1;
                        self.service.handle_text(identity, connection_id, &text).await;
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => {
                            self.state.frames_received += 1;
                            self.service.handle_text(identity, connection_id, &text).await;
                        }
                        Err(_) => {
                            tracing::warn!(identity = %identity, "Dropping non-UTF-8 binary frame");
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    // ping/pong are answered by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
                message = outbound.recv() => {
                    let text = match message {
                        Some(Outbound::Frame(frame)) => match frame.encode() {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::warn!(identity = %identity, error = %e, "Dropping unencodable frame");
                                continue;
                            }
                        },
                        Some(Outbound::Relay(payload)) => payload.to_string(),
                        Some(Outbound::Close) | None => {
                            tracing::debug!(identity = %identity, connection_id, "Channel closed by relay");
                            let _ = sink.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    };
                    sink.send(Message::Text(text)).await?;
                    self.state.frames_sent += 1;
                }
            }
        }
    }

    async fn close(&mut self) {
        let Some(identity) = self.state.close() else {
            return;
        };

        self.service
            .disconnect(&identity, self.state.connection_id)
            .await;
        self.service.stats().connection_closed();

        tracing::info!(
            connection_id = self.state.connection_id,
            identity = %identity,
            duration_secs = self.state.duration().as_secs(),
            frames_received = self.state.frames_received,
            frames_sent = self.state.frames_sent,
            "Connection closed"
        );
    }
}
