use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::info;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{ApsClient, ApsError};

/// OAuth scopes requested from the authentication service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    ViewablesRead,
    BucketCreate,
    BucketRead,
    BucketUpdate,
    BucketDelete,
    DataRead,
    DataWrite,
    DataCreate,
    DataSearch,
    CodeAll,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::ViewablesRead => "viewables:read",
            Scope::BucketCreate => "bucket:create",
            Scope::BucketRead => "bucket:read",
            Scope::BucketUpdate => "bucket:update",
            Scope::BucketDelete => "bucket:delete",
            Scope::DataRead => "data:read",
            Scope::DataWrite => "data:write",
            Scope::DataCreate => "data:create",
            Scope::DataSearch => "data:search",
            Scope::CodeAll => "code:all",
        }
    }
}

/// Cache key: the exact set of scopes a token was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeSet(BTreeSet<Scope>);

impl ScopeSet {
    pub fn new(scopes: impl IntoIterator<Item = Scope>) -> Self {
        Self(scopes.into_iter().collect())
    }

    /// Read-only access for the browser viewer.
    pub fn public() -> Self {
        Self::new([Scope::ViewablesRead])
    }

    /// Server-side read/write access to buckets, objects and automation.
    pub fn internal() -> Self {
        Self::new([
            Scope::BucketCreate,
            Scope::BucketRead,
            Scope::DataRead,
            Scope::DataWrite,
            Scope::DataCreate,
            Scope::CodeAll,
        ])
    }

    /// Bucket maintenance, including object deletion.
    pub fn maintenance() -> Self {
        Self::new([
            Scope::BucketCreate,
            Scope::BucketRead,
            Scope::BucketDelete,
            Scope::BucketUpdate,
            Scope::DataRead,
            Scope::DataWrite,
            Scope::DataCreate,
            Scope::DataSearch,
        ])
    }

    /// Space separated form used by the token endpoint.
    pub fn to_param(&self) -> String {
        self.0
            .iter()
            .map(|scope| scope.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Bearer token. Never mutated; a refresh replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn new(access_token: impl Into<String>, expires_in_secs: i64) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: Utc::now() + Duration::seconds(expires_in_secs),
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Whole seconds left before expiry, zero once expired.
    pub fn expires_in(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Exchange of client credentials for a token.
#[rocket::async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, scopes: &ScopeSet) -> Result<Token, ApsError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

#[rocket::async_trait]
impl TokenExchange for ApsClient {
    async fn exchange(&self, scopes: &ScopeSet) -> Result<Token, ApsError> {
        let url = self.endpoint(&["authentication", "v2", "token"])?;
        let scope = scopes.to_param();
        let response = self
            .http
            .post(url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[("grant_type", "client_credentials"), ("scope", scope.as_str())])
            .send()
            .await
            .map_err(|err| ApsError::Authentication(err.to_string()))?;
        let body: TokenResponse = ApsClient::json(response)
            .await
            .map_err(|err| ApsError::Authentication(err.to_string()))?;
        match (body.access_token, body.expires_in) {
            (Some(access_token), Some(expires_in)) => Ok(Token::new(access_token, expires_in)),
            _ => Err(ApsError::Authentication(
                "Failed to authenticate with Autodesk.".to_string(),
            )),
        }
    }
}

/// Short-lived tokens cached per scope set.
///
/// A cached token is handed out while it is still valid; otherwise a fresh
/// exchange replaces the entry. Concurrent refreshes of the same scope set
/// may both reach the remote service, which is harmless because an exchange
/// only issues another equivalent credential.
pub struct CredentialCache {
    exchange: Arc<dyn TokenExchange>,
    tokens: DashMap<ScopeSet, Token>,
}

impl CredentialCache {
    pub fn new(exchange: Arc<dyn TokenExchange>) -> Self {
        Self {
            exchange,
            tokens: DashMap::new(),
        }
    }

    pub async fn acquire(&self, scopes: &ScopeSet) -> Result<Token, ApsError> {
        if let Some(token) = self.tokens.get(scopes) {
            if token.is_valid_at(Utc::now()) {
                return Ok(token.clone());
            }
        }

        // The map guard is released above; never hold it across the exchange.
        let token = self.exchange.exchange(scopes).await?;
        info!("Issued token for scopes [{}]", scopes.to_param());
        self.tokens.insert(scopes.clone(), token.clone());
        Ok(token)
    }

    pub async fn internal(&self) -> Result<Token, ApsError> {
        self.acquire(&ScopeSet::internal()).await
    }

    pub async fn public(&self) -> Result<Token, ApsError> {
        self.acquire(&ScopeSet::public()).await
    }
}
