//! HTTP boundary: `/login` mints tokens, `/ws` spends one to open a socket.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router};
use axum::body::{Body, Bytes};
use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::create_response_with_body;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{HubConfig, SharedSecret};
use crate::otp::OtpStore;
use crate::signaling::{self, Client, Hub};

/// Login request body.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub otp: String,
}

/// Decides whether a login may be issued a token.
pub trait Authenticate: Send + Sync {
    fn authenticate(&self, credentials: &Credentials) -> bool;
}

impl<F> Authenticate for F
where
    F: Fn(&Credentials) -> bool + Send + Sync,
{
    fn authenticate(&self, credentials: &Credentials) -> bool {
        self(credentials)
    }
}

impl Authenticate for SharedSecret {
    fn authenticate(&self, credentials: &Credentials) -> bool {
        !self.password.is_empty()
            && credentials.username == self.username
            && credentials.password == self.password
    }
}

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
    otps: Arc<OtpStore>,
    authenticator: Arc<dyn Authenticate>,
    allowed_origin: Arc<str>,
    mailbox_capacity: usize,
}

#[derive(Debug, Deserialize)]
struct WsParams {
    #[serde(default)]
    otp: String,
}

pub struct Server {
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
}

impl Server {
    /// Bind the listener and start the token sweeper, both tied to `cancel`.
    pub async fn bind(config: HubConfig, cancel: CancellationToken) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Signaling server listening on {}", listener.local_addr()?);

        let (otps, _sweeper) = OtpStore::start(config.otp_retention, cancel.clone());
        let state = AppState {
            hub: Arc::new(Hub::new(config.send_timeout)),
            otps,
            authenticator: Arc::new(config.credentials),
            allowed_origin: Arc::from(config.allowed_origin),
            mailbox_capacity: config.mailbox_capacity,
        };

        Ok(Self {
            listener,
            state,
            cancel,
        })
    }

    /// Replace the shared-secret check with another authenticator.
    pub fn with_authenticator(mut self, authenticator: impl Authenticate + 'static) -> Self {
        self.state.authenticator = Arc::new(authenticator);
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Arc<Hub> {
        self.state.hub.clone()
    }

    /// Serve until the cancellation token fires, then close every open socket.
    pub async fn run(self) -> std::io::Result<()> {
        let hub = self.state.hub.clone();
        let app = Router::new()
            .route("/login", post(login))
            .route("/ws", get(websocket))
            .with_state(self.state);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await?;

        let closed = hub.close_all();
        info!("Signaling server stopped, closed {} clients", closed);
        Ok(())
    }
}

async fn login(State(state): State<AppState>, body: Bytes) -> Response {
    let credentials: Credentials = match serde_json::from_slice(&body) {
        Ok(c) => c,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    if !state.authenticator.authenticate(&credentials) {
        warn!("Rejected login for {}", credentials.username);
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let token = state.otps.issue(&credentials.username);
    info!("Login accepted for {}", credentials.username);
    (
        StatusCode::OK,
        Json(LoginResponse {
            otp: token.key().to_string(),
        }),
    )
        .into_response()
}

fn origin_allowed(headers: &HeaderMap, allowed: &str) -> bool {
    headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|origin| origin == allowed)
}

async fn websocket(State(state): State<AppState>, mut req: Request) -> Response {
    if !origin_allowed(req.headers(), &state.allowed_origin) {
        warn!("Refusing upgrade from origin {:?}", req.headers().get(header::ORIGIN));
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let switching = match create_response_with_body(&req, Body::empty) {
        Ok(response) => response,
        Err(e) => {
            debug!("Bad upgrade request: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    let Some(on_upgrade) = req.extensions_mut().remove::<OnUpgrade>() else {
        return (StatusCode::BAD_REQUEST, "connection cannot be upgraded").into_response();
    };

    let otp = match Query::<WsParams>::try_from_uri(req.uri()) {
        Ok(Query(params)) => params.otp,
        Err(_) => String::new(),
    };
    if otp.is_empty() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Some(token) = state.otps.redeem(&otp) else {
        debug!("Rejected unknown, used or expired token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let (client, mailbox) = Client::new(token.subject(), state.mailbox_capacity);
    let hub = state.hub.clone();
    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!("Upgrade for {} failed: {}", client.id(), e);
                return;
            }
        };
        let stream =
            WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
        info!("WebSocket connection for {} as {}", client.username(), client.id());
        signaling::serve(hub, client, mailbox, stream).await;
    });

    switching
}
