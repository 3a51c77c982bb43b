//! Outbound API requests

use crate::rest::route::Route;
use http::Method;
use serde_json::Value;
use std::fmt;

/// File attached to a request (sent as multipart)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFile {
    pub name: String,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

impl RequestFile {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A single REST request, opaque to the governor apart from its bucket key
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub route: Route,
    pub method: Method,
    /// Query parameters for GET/DELETE, JSON body otherwise
    pub params: Option<Value>,
    pub files: Vec<RequestFile>,
}

impl ApiRequest {
    pub fn new(method: Method, route: Route) -> Self {
        Self {
            route,
            method,
            params: None,
            files: Vec::new(),
        }
    }

    pub fn get(route: Route) -> Self {
        Self::new(Method::GET, route)
    }

    pub fn post(route: Route) -> Self {
        Self::new(Method::POST, route)
    }

    pub fn put(route: Route) -> Self {
        Self::new(Method::PUT, route)
    }

    pub fn patch(route: Route) -> Self {
        Self::new(Method::PATCH, route)
    }

    pub fn delete(route: Route) -> Self {
        Self::new(Method::DELETE, route)
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn file(mut self, file: RequestFile) -> Self {
        self.files.push(file);
        self
    }

    /// Key of the bucket governing this request
    pub fn bucket_key(&self) -> BucketKey {
        BucketKey::new(self.route.template(), self.method.clone())
    }
}

/// Identifies a rate-limit bucket: route template plus HTTP method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub route: &'static str,
    pub method: Method,
}

impl BucketKey {
    pub fn new(route: &'static str, method: Method) -> Self {
        Self { route, method }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.route)
    }
}
