//! HTTP transport collaborator
//!
//! The governor only decides *when* a request goes out; a transport performs
//! the single HTTP exchange. [`ReqwestTransport`] is the production one.

use crate::config::ClientConfig;
use crate::error::BoxError;
use crate::rest::request::ApiRequest;
use http::{HeaderMap, Method, StatusCode};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::future::Future;
use tracing::debug;

/// Raw response of one HTTP exchange
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Performs one HTTP exchange
pub trait HttpTransport: Send + Sync + 'static {
    fn execute(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<HttpResponse, BoxError>> + Send;
}

/// reqwest-backed transport authenticating with a bot token
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    authorization: String,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, BoxError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(
                "DiscordBot (https://github.com/0xHoneyJar/arrakis, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            authorization: format!("Bot {}", config.discord_token),
        })
    }
}

impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<HttpResponse, BoxError> {
        let url = format!("{}{}", self.base_url, request.route.path());
        debug!(method = %request.method, %url, files = request.files.len(), "Sending API request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header(http::header::AUTHORIZATION, &self.authorization);

        let query_method = matches!(request.method, Method::GET | Method::DELETE);

        if !request.files.is_empty() {
            let mut form = Form::new();
            if let Some(params) = &request.params {
                form = form.text("payload_json", serde_json::to_string(params)?);
            }
            for (index, file) in request.files.into_iter().enumerate() {
                let mut part = Part::bytes(file.data).file_name(file.name);
                if let Some(content_type) = &file.content_type {
                    part = part.mime_str(content_type)?;
                }
                form = form.part(format!("files[{index}]"), part);
            }
            builder = builder.multipart(form);
        } else if let Some(params) = &request.params {
            builder = if query_method {
                builder.query(&query_pairs(params))
            } else {
                builder.json(params)
            };
        }

        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            url,
            headers,
            body,
        })
    }
}

/// Flatten a JSON object into query pairs; non-object params yield nothing
fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Some(object) = params.as_object() else {
        return Vec::new();
    };

    object
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_pairs_flatten_object() {
        let pairs = query_pairs(&json!({ "limit": 50, "after": "123", "around": null }));
        assert!(pairs.contains(&("limit".to_string(), "50".to_string())));
        assert!(pairs.contains(&("after".to_string(), "123".to_string())));
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_query_pairs_ignore_non_objects() {
        assert!(query_pairs(&json!([1, 2])).is_empty());
    }
}
