//! Google sign-in verification
//!
//! The widget exchanges a Google OAuth access token for an application
//! session token. The access token is verified against Google's userinfo
//! endpoint; a rejected or unreachable verification fails the exchange,
//! no user information is ever fabricated.

use crate::error::{Result, TalkaiError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An authenticated Google user, as returned to the widget
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub uid: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub email_verified: bool,
}

/// Claims returned by Google's OAuth2 userinfo endpoint
#[derive(Debug, Deserialize)]
struct UserinfoResponse {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

/// Verifies Google access tokens against the userinfo endpoint
///
/// The endpoint URL is configurable so tests can point the verifier at a
/// mock server.
pub struct GoogleVerifier {
    client: Client,
    userinfo_url: String,
}

impl GoogleVerifier {
    /// Create a new verifier
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(userinfo_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("talkai/0.2.0")
            .build()
            .map_err(|e| {
                TalkaiError::Authentication(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            userinfo_url: userinfo_url.into(),
        })
    }

    /// Verify an access token and return the user it belongs to
    ///
    /// # Errors
    ///
    /// Returns an authentication error when Google rejects the token or
    /// the userinfo call fails.
    pub async fn verify(&self, access_token: &str) -> Result<AuthenticatedUser> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Google userinfo request failed: {}", e);
                TalkaiError::Authentication(format!("Token verification failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Google rejected access token: {}", status);
            return Err(TalkaiError::Authentication(format!(
                "Google rejected the access token ({})",
                status
            ))
            .into());
        }

        let claims: UserinfoResponse = response.json().await.map_err(|e| {
            TalkaiError::Authentication(format!("Failed to parse userinfo response: {}", e))
        })?;

        Ok(AuthenticatedUser {
            uid: format!("google_{}", claims.sub),
            email: claims.email.unwrap_or_default(),
            display_name: claims.name,
            photo_url: claims.picture,
            email_verified: claims.email_verified,
        })
    }
}

/// Mint an opaque application session token
///
/// The token carries no claims; it is a random 256-bit value in URL-safe
/// base64.
pub fn mint_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
