use anyhow::{anyhow, Result};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE},
    Client,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use shared_config::AppConfig;

/// Thin client for a Bitrix24 inbound webhook.
///
/// Every REST method is reachable as `POST <webhook>/<method>.json`; the
/// planner only ever uses `batch`, which accepts up to fifty pre-encoded
/// sub-requests keyed by name.
#[derive(Clone)]
pub struct BitrixClient {
    client: Client,
    base_url: String,
}

/// Per-command results of one `batch` call, keyed by command name in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchEnvelope {
    pub result: Map<String, Value>,
    pub result_error: Map<String, Value>,
    pub result_next: Map<String, Value>,
}

impl BatchEnvelope {
    /// Bitrix serializes empty PHP arrays as `[]` even where a map is
    /// expected, so every section is accepted as either shape.
    pub fn from_value(value: &Value) -> Result<Self> {
        let inner = value
            .get("result")
            .ok_or_else(|| anyhow!("batch reply has no 'result' section: {}", value))?;

        Ok(Self {
            result: section(inner, "result"),
            result_error: section(inner, "result_error"),
            result_next: section(inner, "result_next"),
        })
    }
}

fn section(inner: &Value, key: &str) -> Map<String, Value> {
    match inner.get(key) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

impl BitrixClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.bitrix_webhook_url.trim_end_matches('/').to_string(),
        }
    }

    fn get_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    pub async fn request<T>(&self, method: &str, body: Value) -> Result<T>
    where
        T: DeserializeOwned,
    {
        if self.base_url.is_empty() {
            return Err(anyhow!("Bitrix webhook URL is not configured"));
        }

        let url = format!("{}/{}.json", self.base_url, method);
        debug!("Making request to {}", url);

        let response = self
            .client
            .post(&url)
            .headers(self.get_headers())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => anyhow!("Authentication error: {}", error_text),
                404 => anyhow!("Method not found: {}", error_text),
                429 | 503 => anyhow!("Rate limited by remote store: {}", error_text),
                _ => anyhow!("API error ({}): {}", status, error_text),
            });
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// Submit pre-encoded commands as one `batch` call.
    ///
    /// With `halt` set the store stops executing at the first failing command
    /// and omits the results of everything after it.
    pub async fn call_batch(&self, commands: &[(String, String)], halt: bool) -> Result<BatchEnvelope> {
        let cmd: Map<String, Value> = commands
            .iter()
            .map(|(name, encoded)| (name.clone(), Value::String(encoded.clone())))
            .collect();

        debug!("Submitting batch of {} commands (halt={})", commands.len(), halt);

        let reply: Value = self
            .request(
                "batch",
                json!({
                    "halt": if halt { 1 } else { 0 },
                    "cmd": cmd,
                }),
            )
            .await?;

        if let Some(err) = reply.get("error") {
            let description = reply
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(anyhow!("Batch rejected: {} {}", err, description));
        }

        BatchEnvelope::from_value(&reply)
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}
