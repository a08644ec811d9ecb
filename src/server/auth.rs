//! Authentication hand-off
//!
//! The relay does not verify credentials itself. After the WebSocket
//! upgrade, the upgrade request is handed to an [`Authenticator`] which
//! either returns the caller's stable [`Identity`] or rejects the
//! connection. A rejected connection is closed before any frame is sent.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;

use tokio_tungstenite::tungstenite::http::{header, HeaderMap, Uri};

use crate::protocol::Identity;

/// Default name of the session cookie checked by [`TokenAuthenticator`]
pub const DEFAULT_SESSION_COOKIE: &str = "session_token";

/// The parts of a WebSocket upgrade request an authenticator may inspect
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    peer_addr: SocketAddr,
    uri: Uri,
    headers: HeaderMap,
}

impl HandshakeRequest {
    pub fn new(peer_addr: SocketAddr, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            peer_addr,
            uri,
            headers,
        }
    }

    /// Remote address of the connection
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Request target
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Token from an `Authorization: Bearer <token>` header
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let token = value.strip_prefix("Bearer ")?.trim();
        (!token.is_empty()).then_some(token)
    }

    /// Raw value of a query parameter (not percent-decoded)
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.uri.query()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then_some(value)
        })
    }

    /// Value of a cookie from any `Cookie` header
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .find_map(|pair| {
                let (key, value) = pair.trim().split_once('=')?;
                (key == name).then_some(value)
            })
    }
}

/// Resolves an upgrade request to a participant identity
///
/// Implementations typically call out to a session store; the returned
/// future is awaited before the connection is registered.
pub trait Authenticator: Send + Sync + 'static {
    /// Return the caller's identity, or `None` to reject the connection
    fn authenticate(
        &self,
        request: &HandshakeRequest,
    ) -> impl Future<Output = Option<Identity>> + Send;
}

/// Authenticator backed by a fixed table of session tokens
///
/// The token is taken from, in order: a bearer `Authorization` header, the
/// `token` query parameter, or the session cookie.
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    tokens: HashMap<String, Identity>,
    cookie_name: String,
}

impl Default for TokenAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenAuthenticator {
    /// Create an empty table; every request is rejected until tokens are added
    pub fn new() -> Self {
        Self {
            tokens: HashMap::new(),
            cookie_name: DEFAULT_SESSION_COOKIE.to_owned(),
        }
    }

    /// Use a different session cookie name
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Add a token granting `identity`
    pub fn insert(&mut self, token: impl Into<String>, identity: impl Into<Identity>) {
        self.tokens.insert(token.into(), identity.into());
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with_token(mut self, token: impl Into<String>, identity: impl Into<Identity>) -> Self {
        self.insert(token, identity);
        self
    }

    /// Number of known tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are known
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Look up the identity for a request without awaiting
    pub fn resolve(&self, request: &HandshakeRequest) -> Option<Identity> {
        let token = request
            .bearer_token()
            .or_else(|| request.query_param("token"))
            .or_else(|| request.cookie(&self.cookie_name))?;
        self.tokens.get(token).cloned()
    }
}

impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, request: &HandshakeRequest) -> Option<Identity> {
        let identity = self.resolve(request);
        if identity.is_none() {
            tracing::debug!(peer = %request.peer_addr(), "No known session token");
        }
        identity
    }
}
