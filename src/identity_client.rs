use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

use crate::auth::{AuthError, AuthProvider, Identity, Session};

/// Client for an identity-toolkit style REST API.
pub struct RestAuthClient {
    base_url: String,
    api_key: String,
    http_client: Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    id_token: String,
    local_id: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl RestAuthClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http_client,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<T, AuthError> {
        let url = format!("{}/accounts:{}", self.base_url, endpoint);

        let response = self
            .http_client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to auth provider", endpoint))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let code = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or_default();
            return Err(classify(&code).unwrap_or_else(|| {
                AuthError::Backend(anyhow!(
                    "Auth provider {} failed (status {}): {}",
                    endpoint,
                    status,
                    text
                ))
            }));
        }

        let parsed: T = response
            .json()
            .await
            .with_context(|| format!("Failed to parse auth provider {} response", endpoint))?;
        Ok(parsed)
    }

    async fn password_session(
        &self,
        endpoint: &str,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let body = json!({
            "email": email.trim(),
            "password": password,
            "returnSecureToken": true,
        });

        match self.call::<TokenResponse>(endpoint, body).await {
            Ok(token) => Ok(Session {
                token: token.id_token,
                identity: Identity {
                    uid: token.local_id,
                    email: token.email,
                },
            }),
            Err(AuthError::InvalidToken) => Err(AuthError::InvalidCredentials),
            Err(e) => Err(e),
        }
    }
}

/// Maps provider error codes such as `EMAIL_EXISTS` or
/// `WEAK_PASSWORD : Password should be at least 6 characters`.
fn classify(code: &str) -> Option<AuthError> {
    let code = code.split(':').next().unwrap_or_default().trim();
    let error = match code {
        "EMAIL_EXISTS" => AuthError::EmailInUse,
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "USER_DISABLED" => {
            AuthError::InvalidCredentials
        }
        "WEAK_PASSWORD" => AuthError::WeakPassword,
        "INVALID_EMAIL" | "MISSING_EMAIL" => AuthError::InvalidEmail,
        "INVALID_ID_TOKEN" | "TOKEN_EXPIRED" | "USER_NOT_FOUND" => AuthError::InvalidToken,
        _ => return None,
    };
    Some(error)
}

#[async_trait]
impl AuthProvider for RestAuthClient {
    async fn signup(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self.password_session("signUp", email, password).await?;
        tracing::info!(uid = %session.identity.uid, "account created");
        Ok(session)
    }

    async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.password_session("signInWithPassword", email, password).await
    }

    /// ID tokens cannot be revoked through this API; signing out is the
    /// client discarding its token.
    async fn logout(&self, _token: &str) -> Result<(), AuthError> {
        Ok(())
    }

    async fn identify(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        match self
            .call::<LookupResponse>("lookup", json!({ "idToken": token }))
            .await
        {
            Ok(lookup) => Ok(lookup.users.into_iter().next().map(|user| Identity {
                uid: user.local_id,
                email: user.email,
            })),
            Err(AuthError::InvalidToken) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
