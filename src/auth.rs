use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LibError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct UserId(pub Uuid);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for UserId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// A credential presented by a caller, before it has been checked.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
}

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(token.into())
    }

    /// Parses an `Authorization` header value. Only the bearer scheme is understood.
    pub fn from_authorization_header(value: &str) -> Option<Self> {
        let (scheme, token) = value.trim().split_once(' ')?;
        let token = token.trim();
        if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
            return None;
        }
        Some(Self::Bearer(token.to_string()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// The caller identity produced by a successful [`Authenticator::authenticate`].
///
/// Store operations take their owner id from an `Identity`, never from request data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    user_id: UserId,
}

impl Identity {
    /// For [`Authenticator`] implementations only.
    pub fn authenticated(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

/// Resolves a credential into an identity. Stateless per call; implementations must not
/// cache results or retry.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credential: &Credential) -> Result<Identity>;
}

impl<T: Authenticator + ?Sized> Authenticator for Arc<T> {
    fn authenticate(&self, credential: &Credential) -> Result<Identity> {
        (**self).authenticate(credential)
    }
}

/// Authenticates opaque bearer tokens against a fixed token table.
#[derive(Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: UserId) -> Self {
        self.tokens.insert(token.into(), user_id);
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Parses `token=user-uuid` pairs separated by commas.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut authenticator = Self::new();
        for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
            let (token, user_id) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("token entry '{}' is missing '='", redact(pair)))?;
            let token = token.trim();
            if token.is_empty() {
                return Err(anyhow!("token entry has an empty token"));
            }
            let user_id = UserId::from_str(user_id.trim())
                .with_context(|| format!("invalid user id for token '{}'", redact(token)))?;
            authenticator.tokens.insert(token.to_string(), user_id);
        }
        Ok(authenticator)
    }
}

impl fmt::Debug for StaticTokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenAuthenticator")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, credential: &Credential) -> Result<Identity> {
        let Credential::Bearer(token) = credential;
        match self.tokens.get(token) {
            Some(user_id) => Ok(Identity::authenticated(*user_id)),
            None => {
                tracing::warn!("rejected unknown bearer token");
                Err(LibError::unauthenticated(
                    "Invalid or expired credential",
                    anyhow!("bearer token not recognized"),
                ))
            }
        }
    }
}

fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(4).collect();
    format!("{prefix}…")
}
