use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::error::ShipmentError;

/// Minimum password length accepted at signup.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Live sessions kept per account by [`MemoryAuth`]. Signing in again past
/// this evicts the oldest token.
pub const MAX_SESSIONS_PER_ACCOUNT: usize = 8;

/// Signed-in user as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub identity: Identity,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("email already in use")]
    EmailInUse,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    WeakPassword,

    #[error("invalid email address")]
    InvalidEmail,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("auth provider failure: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Hosted identity service: account creation, sign-in and token lookup.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn signup(&self, email: &str, password: &str) -> Result<Session, AuthError>;
    async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError>;
    async fn logout(&self, token: &str) -> Result<(), AuthError>;
    /// Resolves a session token. Unknown or expired tokens yield `None`.
    async fn identify(&self, token: &str) -> Result<Option<Identity>, AuthError>;
}

/// Emails granted admin rights.
#[derive(Debug, Clone, Default)]
pub struct AdminAllowList {
    emails: HashSet<String>,
}

impl AdminAllowList {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let emails = emails
            .into_iter()
            .map(|email| normalize_email(email.as_ref()))
            .filter(|email| !email.is_empty())
            .collect();
        Self { emails }
    }

    /// Parses a comma separated list such as `ADMIN_EMAILS`.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn contains(&self, email: &str) -> bool {
        self.emails.contains(&normalize_email(email))
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Who is making the current request. Built once per request and passed to
/// every service call.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    identity: Option<Identity>,
    is_admin: bool,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn resolve(identity: Option<Identity>, admins: &AdminAllowList) -> Self {
        let is_admin = identity
            .as_ref()
            .is_some_and(|identity| admins.contains(&identity.email));
        Self { identity, is_admin }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn require_user(&self) -> Result<&Identity, ShipmentError> {
        self.identity.as_ref().ok_or(ShipmentError::Unauthenticated)
    }

    pub fn require_admin(&self) -> Result<&Identity, ShipmentError> {
        let identity = self.require_user()?;
        if !self.is_admin {
            return Err(ShipmentError::Forbidden);
        }
        Ok(identity)
    }
}

struct Account {
    identity: Identity,
    salt: String,
    digest: String,
}

#[derive(Default)]
struct MemoryAuthState {
    accounts: HashMap<String, Account>,
    sessions: HashMap<String, Identity>,
    // Oldest first, per uid.
    tokens: HashMap<String, VecDeque<String>>,
}

/// In-process auth provider for local runs and tests.
#[derive(Default)]
pub struct MemoryAuth {
    state: RwLock<MemoryAuthState>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }

    async fn open_session(&self, identity: Identity) -> Session {
        let token = random_hex::<32>();
        let mut state = self.state.write().await;
        let MemoryAuthState {
            sessions, tokens, ..
        } = &mut *state;

        let owned = tokens.entry(identity.uid.clone()).or_default();
        owned.push_back(token.clone());
        while owned.len() > MAX_SESSIONS_PER_ACCOUNT {
            if let Some(evicted) = owned.pop_front() {
                sessions.remove(&evicted);
                tracing::debug!(uid = %identity.uid, "oldest session evicted");
            }
        }
        sessions.insert(token.clone(), identity.clone());
        Session { token, identity }
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn signup(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = normalize_email(email);
        if !looks_like_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }

        let identity = {
            let mut state = self.state.write().await;
            if state.accounts.contains_key(&email) {
                return Err(AuthError::EmailInUse);
            }
            let salt = random_hex::<16>();
            let account = Account {
                identity: Identity {
                    uid: uuid::Uuid::new_v4().simple().to_string(),
                    email: email.clone(),
                },
                digest: digest(&salt, password),
                salt,
            };
            let identity = account.identity.clone();
            state.accounts.insert(email, account);
            identity
        };

        tracing::info!(uid = %identity.uid, "account created");
        Ok(self.open_session(identity).await)
    }

    async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = normalize_email(email);
        let identity = {
            let state = self.state.read().await;
            let account = state
                .accounts
                .get(&email)
                .ok_or(AuthError::InvalidCredentials)?;
            if digest(&account.salt, password) != account.digest {
                return Err(AuthError::InvalidCredentials);
            }
            account.identity.clone()
        };
        Ok(self.open_session(identity).await)
    }

    async fn logout(&self, token: &str) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        if let Some(identity) = state.sessions.remove(token) {
            if let Some(owned) = state.tokens.get_mut(&identity.uid) {
                owned.retain(|t| t != token);
                if owned.is_empty() {
                    state.tokens.remove(&identity.uid);
                }
            }
        }
        Ok(())
    }

    async fn identify(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        Ok(self.state.read().await.sessions.get(token).cloned())
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn random_hex<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}
