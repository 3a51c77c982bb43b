//! Response classification

use crate::error::ApiError;
use crate::rest::request::BucketKey;
use crate::rest::transport::HttpResponse;
use http::StatusCode;
use serde_json::Value;

/// Status codes passed through as success
pub const VALID_CODES: [StatusCode; 3] = [StatusCode::OK, StatusCode::CREATED, StatusCode::NO_CONTENT];

/// Classify a response into the decoded body or a surfaced error
///
/// Special statuses (401, 403, 429) are recognized ahead of the generic
/// error path. Side effects of a 401 belong to the caller.
pub fn classify(key: &BucketKey, response: &HttpResponse) -> Result<Option<Value>, ApiError> {
    match response.status {
        StatusCode::UNAUTHORIZED => {
            return Err(ApiError::Unauthorized {
                url: response.url.clone(),
            })
        }
        StatusCode::FORBIDDEN => {
            return Err(ApiError::Forbidden {
                url: response.url.clone(),
            })
        }
        StatusCode::TOO_MANY_REQUESTS => {
            return Err(ApiError::RateLimitAnomaly {
                route: key.route,
                method: key.method.clone(),
                url: response.url.clone(),
                retry_after: retry_after(response),
            })
        }
        _ => {}
    }

    if VALID_CODES.contains(&response.status) {
        if response.status == StatusCode::NO_CONTENT || response.body.is_empty() {
            return Ok(None);
        }

        return serde_json::from_slice(&response.body)
            .map(Some)
            .map_err(|source| ApiError::Decode {
                url: response.url.clone(),
                source,
            });
    }

    Err(generic_error(response))
}

fn generic_error(response: &HttpResponse) -> ApiError {
    let status = response.status;
    let url = response.url.clone();

    match serde_json::from_slice::<Value>(&response.body) {
        Ok(Value::Array(items)) => ApiError::MalformedResponse {
            status,
            url,
            body: Value::Array(items).to_string(),
        },
        Ok(body) => {
            let message = ["message", "content"]
                .iter()
                .find_map(|field| body.get(field).and_then(Value::as_str))
                .map(str::to_owned)
                .unwrap_or_else(|| body.to_string());
            ApiError::Api {
                status,
                url,
                message,
            }
        }
        Err(_) => ApiError::Api {
            status,
            url,
            message: String::from_utf8_lossy(&response.body).into_owned(),
        },
    }
}

/// `retry_after` from the error body, falling back to the `retry-after` header
fn retry_after(response: &HttpResponse) -> Option<f64> {
    serde_json::from_slice::<Value>(&response.body)
        .ok()
        .and_then(|body| body.get("retry_after").and_then(Value::as_f64))
        .or_else(|| {
            response
                .headers
                .get(http::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        })
}
