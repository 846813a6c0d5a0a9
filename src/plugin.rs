//! Client for the DNS daemon's embedded plugin API.
//!
//! The endpoint is resolved on every call: fixed overrides from the environment win,
//! then the persisted settings (`mosdnsPluginBase`, `mosdnsPluginHost`,
//! `mosdnsPluginPort`), then `127.0.0.1:9099`. The same host and port double as the
//! administrative endpoint probed by the process hooks.
use std::sync::Arc;

use bytes::Bytes;
use reqwest::{Method, Url, header::CONTENT_TYPE};
use serde_json::json;
use tracing::debug;

use crate::{
    constants::{DEFAULT_PLUGIN_HOST, DEFAULT_PLUGIN_PORT, PLUGIN_REQUEST_TIMEOUT},
    error::PluginError,
    store::StateStore,
};

/// Settings keys consulted after the environment overrides.
pub const BASE_SETTING: &str = "mosdnsPluginBase";
pub const HOST_SETTING: &str = "mosdnsPluginHost";
pub const PORT_SETTING: &str = "mosdnsPluginPort";

/// Tags accepted by the list endpoints.
pub const LIST_TAGS: [&str; 5] = ["whitelist", "blocklist", "greylist", "ddnslist", "client_ip"];

/// Tags accepted by the switch endpoints.
pub const SWITCH_TAGS: [&str; 9] = [
    "switch1", "switch2", "switch3", "switch4", "switch5", "switch6", "switch7", "switch8",
    "switch9",
];

/// Endpoint values fixed at startup, typically from the environment.
#[derive(Debug, Clone, Default)]
pub struct EndpointOverrides {
    /// Full base URL, with or without scheme.
    pub base: Option<String>,
    /// Host used for status probes and URL construction.
    pub host: Option<String>,
    pub port: Option<String>,
}

/// Resolves the plugin API location from overrides and persisted settings.
#[derive(Clone)]
pub struct PluginEndpoint {
    overrides: EndpointOverrides,
    store: Arc<dyn StateStore>,
}

impl PluginEndpoint {
    pub fn new(overrides: EndpointOverrides, store: Arc<dyn StateStore>) -> Self {
        Self { overrides, store }
    }

    fn setting(&self, key: &str) -> Option<String> {
        self.store
            .settings()
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn base_override(&self) -> Option<String> {
        self.overrides
            .base
            .as_deref()
            .and_then(normalize_base_url)
    }

    fn base_setting(&self) -> Option<String> {
        self.setting(BASE_SETTING)
            .as_deref()
            .and_then(normalize_base_url)
    }

    pub fn host(&self) -> String {
        let from_override = self
            .overrides
            .host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_string);

        from_override
            .or_else(|| self.base_override().and_then(|base| host_port(&base).0))
            .or_else(|| self.base_setting().and_then(|base| host_port(&base).0))
            .or_else(|| self.setting(HOST_SETTING))
            .unwrap_or_else(|| DEFAULT_PLUGIN_HOST.to_string())
    }

    /// Unparseable port values are skipped in favour of the next source.
    pub fn port(&self) -> u16 {
        let from_override = self
            .overrides
            .port
            .as_deref()
            .and_then(|port| port.trim().parse().ok());

        from_override
            .or_else(|| self.base_override().and_then(|base| host_port(&base).1))
            .or_else(|| self.base_setting().and_then(|base| host_port(&base).1))
            .or_else(|| self.setting(PORT_SETTING).and_then(|port| port.parse().ok()))
            .unwrap_or(DEFAULT_PLUGIN_PORT)
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> String {
        if let Some(base) = self.base_override().or_else(|| self.base_setting()) {
            return base;
        }
        let host = self.host();
        if host.contains(':') {
            format!("http://[{host}]:{}", self.port())
        } else {
            format!("http://{host}:{}", self.port())
        }
    }
}

/// Trims whitespace and trailing slashes, and adds `http://` when no scheme is given.
pub fn normalize_base_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else if trimmed.contains("://") {
        Some(trimmed.to_string())
    } else {
        Some(format!("http://{trimmed}"))
    }
}

/// Host and explicit port of a normalized base URL.
fn host_port(base: &str) -> (Option<String>, Option<u16>) {
    match Url::parse(base) {
        Ok(url) => {
            let host = url
                .host_str()
                .map(|host| host.trim_start_matches('[').trim_end_matches(']').to_string())
                .filter(|host| !host.is_empty());
            (host, url.port())
        }
        Err(_) => (None, None),
    }
}

pub fn is_list_tag(tag: &str) -> bool {
    LIST_TAGS.contains(&tag)
}

pub fn is_switch_tag(tag: &str) -> bool {
    SWITCH_TAGS.contains(&tag)
}

/// HTTP client for the plugin API.
#[derive(Clone)]
pub struct PluginClient {
    http: reqwest::Client,
    endpoint: PluginEndpoint,
}

impl PluginClient {
    pub fn new(endpoint: PluginEndpoint) -> Result<Self, PluginError> {
        let http = reqwest::Client::builder()
            .timeout(PLUGIN_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &PluginEndpoint {
        &self.endpoint
    }

    /// Sends one request and returns the body. Statuses of 400 and above become
    /// [`PluginError::Upstream`].
    pub async fn call(
        &self,
        path: &str,
        method: Method,
        content_type: Option<&str>,
        body: Option<Bytes>,
    ) -> Result<Bytes, PluginError> {
        let url = format!("{}{}", self.endpoint.base_url(), path);
        debug!("Plugin request {method} {url}");

        let mut request = self.http.request(method, &url);
        if let Some(content_type) = content_type.filter(|value| !value.is_empty()) {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if let Some(body) = body.filter(|body| !body.is_empty()) {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let data = response.bytes().await?;
        if status.is_client_error() || status.is_server_error() {
            let trimmed = String::from_utf8_lossy(&data).trim().to_string();
            let message = if trimmed.is_empty() {
                status.to_string()
            } else {
                trimmed
            };
            return Err(PluginError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        Ok(data)
    }

    /// Current contents of the list `tag`.
    pub async fn show_list(&self, tag: &str) -> Result<Bytes, PluginError> {
        ensure(is_list_tag(tag), tag)?;
        self.call(&format!("/plugins/{tag}/show"), Method::GET, None, None)
            .await
    }

    /// Replaces the list `tag` with `body`, then asks the plugin to save it.
    pub async fn update_list(
        &self,
        tag: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<(), PluginError> {
        ensure(is_list_tag(tag), tag)?;
        self.call(
            &format!("/plugins/{tag}/post"),
            Method::POST,
            content_type,
            Some(body),
        )
        .await?;
        self.call(&format!("/plugins/{tag}/save"), Method::GET, None, None)
            .await?;
        Ok(())
    }

    /// Trimmed value of the switch `tag`.
    pub async fn switch_value(&self, tag: &str) -> Result<String, PluginError> {
        ensure(is_switch_tag(tag), tag)?;
        let data = self
            .call(&format!("/plugins/{tag}/show"), Method::GET, None, None)
            .await?;
        Ok(String::from_utf8_lossy(&data).trim().to_string())
    }

    /// Sets the switch `tag` to `value` and saves it.
    pub async fn set_switch(&self, tag: &str, value: &str) -> Result<(), PluginError> {
        ensure(is_switch_tag(tag), tag)?;
        let body = Bytes::from(json!({ "value": value }).to_string());
        self.call(
            &format!("/plugins/{tag}/post"),
            Method::POST,
            Some("application/json"),
            Some(body),
        )
        .await?;
        self.call(&format!("/plugins/{tag}/save"), Method::GET, None, None)
            .await?;
        Ok(())
    }
}

fn ensure(known: bool, tag: &str) -> Result<(), PluginError> {
    if known {
        Ok(())
    } else {
        Err(PluginError::UnknownTag(tag.to_string()))
    }
}
