use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use super::client::BnmpApi;
use super::types::{ApiMap, Page, SortOrder};
use crate::config::{HttpConfig, UrlConfig};
use crate::error::{BnmpError, Result};

/// Header bundle supplied fresh per run by the cookie-refresh workflow.
///
/// The pipeline never refreshes the session itself; it only observes
/// 401-equivalent responses and fails the run with `InvalidCookie`.
#[derive(Debug, Clone, Default)]
pub struct HeaderBundle {
    headers: HashMap<String, String>,
}

impl HeaderBundle {
    /// Load the bundle from the JSON file the cookie provider maintains.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let headers: HashMap<String, String> = serde_json::from_str(&text)?;
        Ok(Self { headers })
    }

    /// Build the browser-equivalent header set around a session cookie.
    pub fn with_cookie(cookie: &str) -> Self {
        let mut headers = HashMap::new();
        headers.insert("accept".to_string(), "application/json".to_string());
        headers.insert(
            "content-type".to_string(),
            "application/json;charset=UTF-8".to_string(),
        );
        headers.insert("cookie".to_string(), cookie.to_string());
        headers.insert(
            "origin".to_string(),
            "https://portalbnmp.cnj.jus.br".to_string(),
        );
        headers.insert(
            "referer".to_string(),
            "https://portalbnmp.cnj.jus.br/".to_string(),
        );
        Self { headers }
    }

    fn to_header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| BnmpError::Config(format!("Invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| BnmpError::Config(format!("Invalid header value: {}", e)))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

/// `BnmpApi` implementation over a pooled reqwest client.
pub struct HttpBnmpApi {
    urls: UrlConfig,
    client: Client,
}

impl HttpBnmpApi {
    pub fn new(urls: UrlConfig, http: &HttpConfig, bundle: &HeaderBundle) -> Result<Self> {
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(http.timeout))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .user_agent(&http.user_agent)
            .default_headers(bundle.to_header_map()?)
            .build()
            .map_err(BnmpError::Network)?;

        Ok(Self { urls, client })
    }

    fn page_url(&self, page: u32, size: u32, order: SortOrder) -> String {
        self.urls
            .filter
            .replace("{page}", &page.to_string())
            .replace("{size}", &size.to_string())
            .replace("{order}", order.as_str())
    }

    /// Read a response into JSON, mapping auth failures and error-shaped
    /// bodies onto the error taxonomy. The API frequently reports errors
    /// with HTTP 200 and a `type`/`status` body, so both layers are checked.
    async fn read_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if status.as_u16() == 401 {
            return Err(BnmpError::InvalidCookie);
        }

        let text = response.text().await.map_err(BnmpError::Network)?;
        if !status.is_success() {
            return Err(BnmpError::Api {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let value: Value =
            serde_json::from_str(&text).map_err(|e| BnmpError::Parse(format!(
                "Response is not valid JSON: {}. Body starts with: {}",
                e,
                text.chars().take(100).collect::<String>()
            )))?;

        if value.get("type").is_some() {
            let code = value
                .get("status")
                .and_then(Value::as_u64)
                .unwrap_or_default() as u16;
            if code == 401 {
                return Err(BnmpError::InvalidCookie);
            }
            return Err(BnmpError::Api {
                status: code,
                body: value.to_string().chars().take(200).collect(),
            });
        }

        Ok(value)
    }

    async fn get_ids(&self, url: &str) -> Result<Vec<u64>> {
        let response = self.client.get(url).send().await.map_err(BnmpError::Network)?;
        let value = Self::read_json(response).await?;
        let entries = value
            .as_array()
            .ok_or_else(|| BnmpError::Parse(format!("Expected a JSON array from {}", url)))?;
        Ok(entries
            .iter()
            .filter_map(|entry| entry.get("id").and_then(Value::as_u64))
            .collect())
    }
}

#[async_trait]
impl BnmpApi for HttpBnmpApi {
    async fn fetch_page(
        &self,
        map: &ApiMap,
        page: u32,
        size: u32,
        order: SortOrder,
    ) -> Result<Page> {
        let url = self.page_url(page, size, order);
        debug!("POST {} [{}]", url, map.describe());
        let response = self
            .client
            .post(&url)
            .json(&map.payload())
            .send()
            .await
            .map_err(BnmpError::Network)?;

        let value = Self::read_json(response).await?;
        serde_json::from_value(value)
            .map_err(|e| BnmpError::Parse(format!("Unexpected page shape: {}", e)))
    }

    async fn fetch_detail(&self, id: &str, doc_type: &str) -> Result<Value> {
        let url = self
            .urls
            .detail
            .replace("{id}", id)
            .replace("{type}", doc_type);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await.map_err(BnmpError::Network)?;
        Self::read_json(response).await
    }

    async fn cities(&self, state_id: u32) -> Result<Vec<u64>> {
        let url = self.urls.cities.replace("{state}", &state_id.to_string());
        self.get_ids(&url).await
    }

    async fn agencies(&self, city_id: u64) -> Result<Vec<u64>> {
        let url = self.urls.agencies.replace("{city}", &city_id.to_string());
        self.get_ids(&url).await
    }
}
