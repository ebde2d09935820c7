use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dokkan_core::config::{AggregatorConfig, SourceDef};
use dokkan_core::error::AppError;
use dokkan_core::models::{FetchParams, RawRecord};
use dokkan_core::traits::SourceAdapter;
use reqwest::Client;
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = "dokkan/0.1 (data aggregator)";

/// Placeholder substituted with the data type name in endpoint templates.
const DATA_TYPE_PLACEHOLDER: &str = "{data_type}";

#[derive(Debug, Clone)]
struct Endpoint {
    template: String,
    records_pointer: Option<String>,
}

/// [`SourceAdapter`] that fetches JSON over HTTP.
///
/// Each source is an endpoint template such as
/// `https://dokkaninfo.com/api/{data_type}` plus an optional JSON pointer to
/// the record array inside the response. Sample requests carry the wanted
/// size as a `limit` query parameter, and the result is truncated to it in
/// case the upstream ignores the hint.
#[derive(Clone)]
pub struct HttpSources {
    client: Client,
    timeout_secs: u64,
    endpoints: Arc<HashMap<String, Endpoint>>,
}

impl HttpSources {
    pub fn from_config(config: &AggregatorConfig) -> Result<Self, AppError> {
        Self::new(&config.sources, DEFAULT_TIMEOUT)
    }

    /// Sources without an endpoint are accepted but fail every fetch.
    pub fn new(sources: &[SourceDef], timeout: Duration) -> Result<Self, AppError> {
        let mut endpoints = HashMap::new();
        for source in sources {
            let Some(template) = &source.endpoint else {
                tracing::debug!(source = %source.id, "Source has no HTTP endpoint");
                continue;
            };
            validate_template(&source.id, template)?;
            endpoints.insert(
                source.id.clone(),
                Endpoint {
                    template: template.clone(),
                    records_pointer: source.records_pointer.clone(),
                },
            );
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
            endpoints: Arc::new(endpoints),
        })
    }

    async fn get_json(&self, url: &Url) -> Result<serde_json::Value, AppError> {
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to decode JSON body: {e}")))
    }
}

impl SourceAdapter for HttpSources {
    async fn fetch(
        &self,
        source: &str,
        data_type: &str,
        params: &FetchParams,
    ) -> Result<Vec<RawRecord>, AppError> {
        let endpoint = self.endpoints.get(source).ok_or_else(|| {
            AppError::ConfigError(format!("Source '{source}' has no HTTP endpoint"))
        })?;

        let url = build_url(&endpoint.template, data_type, params)?;
        tracing::debug!(source = %source, data_type = %data_type, %url, "Requesting");
        let body = self.get_json(&url).await?;

        let mut records = extract_records(source, body, endpoint.records_pointer.as_deref())?;
        if let Some(limit) = params.limit {
            records.truncate(limit);
        }
        tracing::debug!(
            source = %source,
            data_type = %data_type,
            count = records.len(),
            "Decoded records"
        );
        Ok(records)
    }
}

fn validate_template(source: &str, template: &str) -> Result<(), AppError> {
    let probe = template.replace(DATA_TYPE_PLACEHOLDER, "probe");
    let url = Url::parse(&probe).map_err(|e| {
        AppError::ConfigError(format!("Invalid endpoint for source '{source}': {e}"))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(AppError::ConfigError(format!(
            "Endpoint scheme '{scheme}' of source '{source}' is not allowed (only http/https)"
        ))),
    }
}

/// Substitute the data type into the template and add the `limit` hint.
fn build_url(template: &str, data_type: &str, params: &FetchParams) -> Result<Url, AppError> {
    let mut url = Url::parse(&template.replace(DATA_TYPE_PLACEHOLDER, data_type))
        .map_err(|e| AppError::ConfigError(format!("Invalid endpoint URL: {e}")))?;
    if let Some(limit) = params.limit {
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
    }
    Ok(url)
}

/// Locate the record list in a response body.
///
/// An array yields one record per element; elements that are not objects
/// are wrapped as `{"value": element}`. A lone object is one record and
/// `null` is no records.
fn extract_records(
    source: &str,
    mut body: serde_json::Value,
    pointer: Option<&str>,
) -> Result<Vec<RawRecord>, AppError> {
    let target = match pointer {
        Some(pointer) => body
            .pointer_mut(pointer)
            .map(serde_json::Value::take)
            .ok_or_else(|| AppError::SourceError {
                source_id: source.to_string(),
                message: format!("Response has no value at '{pointer}'"),
            })?,
        None => body,
    };

    match target {
        serde_json::Value::Array(items) => Ok(items.into_iter().map(into_record).collect()),
        serde_json::Value::Object(map) => Ok(vec![map]),
        serde_json::Value::Null => Ok(Vec::new()),
        other => Err(AppError::SourceError {
            source_id: source.to_string(),
            message: format!("Expected a JSON array of records, got {other}"),
        }),
    }
}

fn into_record(item: serde_json::Value) -> RawRecord {
    match item {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = RawRecord::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
