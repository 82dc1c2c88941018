use async_trait::async_trait;
use log::info;
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };

use super::{ AuthError, AuthProvider };
use crate::firebase::FirebaseConfig;
use crate::models::user::SessionContext;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePasswordRequest<'a> {
    id_token: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    id_token: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Identity Toolkit REST client (`accounts:signUp`, `accounts:signInWithPassword`,
/// `accounts:update`).
pub struct FirebaseAuth {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl FirebaseAuth {
    pub fn new(config: &FirebaseConfig) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: config.auth_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    async fn call<T: Serialize + Sync>(
        &self,
        action: &str,
        body: &T,
        fallback_email: &str
    ) -> Result<SessionContext, AuthError> {
        let url = format!("{}/accounts:{}", self.base_url, action);
        let resp = self.http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send().await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(provider_error(&text));
        }
        let token: TokenResponse = serde_json
            ::from_str(&text)
            .map_err(|e| AuthError::Unknown(format!("Invalid token response: {}", e)))?;
        Ok(SessionContext {
            user_id: token.local_id,
            email: token.email.unwrap_or_else(|| fallback_email.to_string()),
            id_token: token.id_token,
        })
    }
}

fn provider_error(body: &str) -> AuthError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => AuthError::from_provider_code(&envelope.error.message),
        Err(_) => AuthError::Unknown(body.to_string()),
    }
}

#[async_trait]
impl AuthProvider for FirebaseAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SessionContext, AuthError> {
        let body = PasswordRequest { email, password, return_secure_token: true };
        let ctx = self.call("signUp", &body, email).await?;
        info!("Registered user {}", ctx.user_id);
        Ok(ctx)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionContext, AuthError> {
        let body = PasswordRequest { email, password, return_secure_token: true };
        self.call("signInWithPassword", &body, email).await
    }

    async fn update_password(
        &self,
        ctx: &SessionContext,
        new_password: &str
    ) -> Result<SessionContext, AuthError> {
        let body = UpdatePasswordRequest {
            id_token: &ctx.id_token,
            password: new_password,
            return_secure_token: true,
        };
        self.call("update", &body, &ctx.email).await
    }
}
