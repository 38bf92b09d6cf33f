use anyhow::{anyhow, Result};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE},
    Client, Method, RequestBuilder, Response,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

const UNIQUE_VIOLATION: &str = "23505";

/// Non-success response from PostgREST or GoTrue.
#[derive(Debug, Error)]
#[error("API error ({status}): {message}")]
pub struct SupabaseApiError {
    pub status: u16,
    pub message: String,
}

impl SupabaseApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self.status, 400 | 401 | 403 | 422)
    }

    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }

    /// PostgreSQL error code PostgREST reports in the body, e.g. `23505`.
    pub fn code(&self) -> Option<String> {
        serde_json::from_str::<Value>(&self.message)
            .ok()?
            .get("code")?
            .as_str()
            .map(str::to_string)
    }

    /// 409 caused by a unique constraint rather than a foreign key or other check.
    pub fn is_unique_violation(&self) -> bool {
        self.is_conflict() && self.code().as_deref() == Some(UNIQUE_VIOLATION)
    }

    /// Pulls the human readable part out of a PostgREST / GoTrue error body.
    pub fn provider_message(&self) -> String {
        serde_json::from_str::<Value>(&self.message)
            .ok()
            .and_then(|body| {
                ["msg", "message", "error_description", "error"]
                    .iter()
                    .find_map(|key| body.get(*key).and_then(Value::as_str).map(str::to_string))
            })
            .unwrap_or_else(|| self.message.clone())
    }
}

/// The typed API error behind an error returned from this client, if it came
/// from the remote API rather than the transport.
pub fn api_error(err: &anyhow::Error) -> Option<&SupabaseApiError> {
    err.downcast_ref::<SupabaseApiError>()
}

#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.anon_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Anonymous reads still need a bearer for PostgREST; the anon key acts as one.
        let bearer = auth_token.unwrap_or(&self.anon_key);
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", bearer))?);

        Ok(headers)
    }

    fn build(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<RequestBuilder> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url).headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        Ok(req)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        error!("API error ({}): {}", status, error_text);

        Err(SupabaseApiError {
            status: status.as_u16(),
            message: error_text,
        }
        .into())
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        headers: Option<HeaderMap>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let req = self.build(method, path, auth_token, body, headers)?;
        let response = Self::check(req.send().await?).await?;

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// For endpoints that answer with an empty body (e.g. `204 No Content`).
    pub async fn request_empty(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
    ) -> Result<()> {
        let req = self.build(method, path, auth_token, body, None)?;
        Self::check(req.send().await?).await?;
        Ok(())
    }

    /// Exact row count for a PostgREST filter, read from the `Content-Range`
    /// header of a `HEAD` request.
    pub async fn count(&self, path: &str, auth_token: Option<&str>) -> Result<u64> {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("count=exact"));

        let req = self.build(Method::HEAD, path, auth_token, None, Some(headers))?;
        let response = Self::check(req.send().await?).await?;

        let range = response
            .headers()
            .get(CONTENT_RANGE)
            .ok_or_else(|| anyhow!("Count response missing Content-Range header"))?
            .to_str()?;

        parse_content_range_total(range)
            .ok_or_else(|| anyhow!("Unparseable Content-Range header: {}", range))
    }
}

/// `0-4/5` and `*/0` both carry the total after the slash.
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

/// Header set asking PostgREST to return the written rows.
pub fn return_representation() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}
