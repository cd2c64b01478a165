use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{
    AuthProvider, GatewayError, GatewayResult, RecordId, RowStore,
    storage::{ensure_success, error_message},
};
use crate::session::{Session, token_expiry};

const PROFILES_TABLE: &str = "profiles";
const ADMIN_ROLE: &str = "admin";

/// Password sign-in against the backend's auth REST API.
///
/// Role checks read the `profiles` table through the row store.
#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    base_url: String,
    api_key: String,
    rows: Arc<dyn RowStore>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    user: TokenUser,
}

#[derive(Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct ProfileRole {
    #[serde(default)]
    role: Option<String>,
}

impl AuthClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        rows: Arc<dyn RowStore>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            rows,
        }
    }
}

#[async_trait]
impl AuthProvider for AuthClient {
    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<Session> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        let response = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        let expires_at = token_expiry(&token.access_token).unwrap_or_else(|| {
            Utc::now() + Duration::seconds(token.expires_in.unwrap_or(3600))
        });

        Ok(Session::new(
            token.user.id,
            token.user.email,
            token.access_token,
            expires_at,
        ))
    }

    async fn sign_out(&self, session: &Session) -> GatewayResult<()> {
        let url = format!("{}/auth/v1/logout", self.base_url);
        let response = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .bearer_auth(session.access_token())
            .send()
            .await?;
        ensure_success(response).await
    }

    async fn is_admin(&self, user_id: &str) -> GatewayResult<bool> {
        match self
            .rows
            .select_one(PROFILES_TABLE, &RecordId::new(user_id))
            .await
        {
            Ok(row) => {
                let profile: ProfileRole = serde_json::from_value(row)?;
                Ok(profile.role.as_deref() == Some(ADMIN_ROLE))
            }
            Err(GatewayError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::gateway::memory::MemoryRowStore;

    fn client_with(rows: MemoryRowStore) -> AuthClient {
        AuthClient::new(
            Client::new(),
            "https://portal.example.org",
            "anon",
            Arc::new(rows),
        )
    }

    #[tokio::test]
    async fn admin_role_is_required() {
        let rows = MemoryRowStore::new()
            .with_rows(
                PROFILES_TABLE,
                vec![
                    json!({"id": "staff-1", "role": "admin"}),
                    json!({"id": "citizen-1", "role": "citizen"}),
                    json!({"id": "blank-1", "role": null}),
                ],
            );
        let auth = client_with(rows);

        assert!(auth.is_admin("staff-1").await.unwrap());
        assert!(!auth.is_admin("citizen-1").await.unwrap());
        assert!(!auth.is_admin("blank-1").await.unwrap());
        assert!(!auth.is_admin("unknown").await.unwrap());
    }

    #[test]
    fn token_response_tolerates_missing_optional_fields() {
        let token: TokenResponse = serde_json::from_value(json!({
            "access_token": "abc",
            "user": {"id": "u1"}
        }))
        .unwrap();
        assert!(token.expires_in.is_none());
        assert!(token.user.email.is_none());
    }
}
