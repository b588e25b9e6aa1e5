//! One-time connection tokens.
//!
//! A token is minted by `/login` and spent by the WebSocket upgrade. It can
//! be redeemed once, and only within the retention window; a sweeper task
//! drops tokens that were never redeemed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5);
const KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    key: String,
    subject: String,
    issued_at: Instant,
}

impl Token {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The username this token was issued to.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    fn expired(&self, now: Instant, retention: Duration) -> bool {
        now.saturating_duration_since(self.issued_at) >= retention
    }
}

#[derive(Debug)]
pub struct OtpStore {
    tokens: Mutex<HashMap<String, Token>>,
    retention: Duration,
}

impl OtpStore {
    /// A store with no sweeper; call `sweep` to expire tokens.
    pub fn new(retention: Duration) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Create a store and spawn its sweeper, which runs every `retention`
    /// until `cancel` fires.
    pub fn start(retention: Duration, cancel: CancellationToken) -> (Arc<Self>, JoinHandle<()>) {
        let store = Arc::new(Self::new(retention));
        let sweeper = tokio::spawn(sweep_loop(store.clone(), cancel));
        (store, sweeper)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Token>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn issue(&self, subject: &str) -> Token {
        let key: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(KEY_LEN)
            .map(char::from)
            .collect();
        let token = Token {
            key: key.clone(),
            subject: subject.to_string(),
            issued_at: Instant::now(),
        };
        self.lock().insert(key, token.clone());
        debug!("Issued token for {}", subject);
        token
    }

    /// Remove and return the token if it exists and has not expired.
    pub fn redeem(&self, key: &str) -> Option<Token> {
        let mut tokens = self.lock();
        let token = tokens.remove(key)?;
        if token.expired(Instant::now(), self.retention) {
            return None;
        }
        Some(token)
    }

    pub fn verify(&self, key: &str) -> bool {
        self.redeem(key).is_some()
    }

    /// Drop every expired token. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|_, token| !token.expired(now, self.retention));
        before - tokens.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

async fn sweep_loop(store: Arc<OtpStore>, cancel: CancellationToken) {
    let period = store.retention;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let removed = store.sweep();
                if removed > 0 {
                    debug!("Swept {} expired tokens", removed);
                }
            }
        }
    }
    info!("Token sweeper stopped");
}
