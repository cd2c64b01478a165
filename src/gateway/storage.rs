use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

use super::{GatewayError, GatewayResult, ObjectStore};
use crate::session;

/// Client for the backend's object-storage REST API.
///
/// Requests are authorised with the token of the staff session the request runs for
/// (see [`session::scoped`]), falling back to the service key (or the anonymous key)
/// otherwise.
#[derive(Clone)]
pub struct StorageClient {
    http: Client,
    base_url: String,
    api_key: String,
    service_key: Option<String>,
}

impl StorageClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        service_key: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            service_key,
        }
    }

    fn authorise(&self, builder: RequestBuilder) -> RequestBuilder {
        let token = session::request_token()
            .or_else(|| self.service_key.clone())
            .unwrap_or_else(|| self.api_key.clone());
        builder.header("apikey", &self.api_key).bearer_auth(token)
    }
}

#[async_trait]
impl ObjectStore for StorageClient {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> GatewayResult<()> {
        let url = format!("{}/storage/v1/object/{bucket}/{path}", self.base_url);
        let response = self
            .authorise(self.http.post(url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;
        ensure_success(response).await
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{path}", self.base_url)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> GatewayResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let url = format!("{}/storage/v1/object/{bucket}", self.base_url);
        let response = self
            .authorise(self.http.delete(url))
            .json(&serde_json::json!({ "prefixes": paths }))
            .send()
            .await?;
        ensure_success(response).await
    }
}

/// Turn a non-2xx backend response into [`GatewayError::Api`], keeping its message.
pub(super) async fn ensure_success(response: Response) -> GatewayResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Api {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

pub(super) fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|value| {
            ["message", "error_description", "msg", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str))
        })
        .map(str::to_string)
        .unwrap_or_else(|| {
            if body.chars().count() > 200 {
                format!("{}...", body.chars().take(200).collect::<String>())
            } else {
                body.to_string()
            }
        })
}
