use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use thiserror::Error;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use super::config::ApiConfig;
use super::payloads::{
    DeleteWorkflowPayload, EnvironmentResponse, WorkflowListResponse, WorkflowRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// JSON body; sent with `Content-Type: application/json`.
    pub body: Option<String>,
    /// Ask the browser to finish the request even if the page unloads.
    pub keepalive: bool,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            keepalive: false,
        }
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("network request failed: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// The only place the sync layer touches the network.
pub trait HttpTransport {
    fn send(&self, request: HttpRequest) -> LocalBoxFuture<'static, Result<HttpResponse, TransportError>>;
}

// ---------------------------------------------------------------------------
// Browser transport – window.fetch
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FetchTransport;

impl FetchTransport {
    /// `fetch` options for `request`.  `RequestInit` has no typed
    /// `keepalive` setter, so that flag is set as a plain JS property.
    pub fn request_init(request: &HttpRequest) -> Result<web_sys::RequestInit, JsValue> {
        use web_sys::{Headers, RequestInit, RequestMode};

        let opts = RequestInit::new();
        opts.set_method(request.method.as_str());
        opts.set_mode(RequestMode::Cors);
        if let Err(e) = js_sys::Reflect::set(
            &opts,
            &JsValue::from_str("keepalive"),
            &JsValue::from_bool(request.keepalive),
        ) {
            log::warn!("Could not set keepalive on {} {}: {:?}", request.method, request.url, e);
        }

        let headers = Headers::new()?;
        if let Some(data) = &request.body {
            opts.set_body(&JsValue::from_str(data));
            headers.append("Content-Type", "application/json")?;
        }
        opts.set_headers(&headers);
        Ok(opts)
    }

    /// Hands the request to the browser immediately; only the response is
    /// awaited later.
    fn start(request: &HttpRequest) -> Result<js_sys::Promise, JsValue> {
        let opts = Self::request_init(request)?;
        let req = web_sys::Request::new_with_str_and_init(&request.url, &opts)?;

        let window = web_sys::window().ok_or_else(|| JsValue::from_str("no global window exists"))?;
        Ok(window.fetch_with_request(&req))
    }

    async fn finish(promise: js_sys::Promise) -> Result<HttpResponse, TransportError> {
        let resp_value = JsFuture::from(promise)
            .await
            .map_err(|e| TransportError::Network(format!("{:?}", e)))?;
        let resp: web_sys::Response = resp_value
            .dyn_into()
            .map_err(|_| TransportError::InvalidResponse("fetch did not return a Response".into()))?;

        let status = resp.status();
        let text_promise = resp
            .text()
            .map_err(|e| TransportError::InvalidResponse(format!("{:?}", e)))?;
        let text = JsFuture::from(text_promise)
            .await
            .map_err(|e| TransportError::InvalidResponse(format!("{:?}", e)))?;
        Ok(HttpResponse {
            status,
            body: text.as_string().unwrap_or_default(),
        })
    }
}

impl HttpTransport for FetchTransport {
    fn send(&self, request: HttpRequest) -> LocalBoxFuture<'static, Result<HttpResponse, TransportError>> {
        match Self::start(&request) {
            Ok(promise) => Self::finish(promise).boxed_local(),
            Err(e) => {
                let error = TransportError::Network(format!("{:?}", e));
                futures::future::ready(Err(error)).boxed_local()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// REST client for the workflow and environment endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("API request failed: {status} {body}")]
    Status { status: u16, body: String },
    #[error("failed to encode or decode API payload: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct ApiClient {
    config: Rc<ApiConfig>,
    transport: Rc<dyn HttpTransport>,
}

impl ApiClient {
    pub fn new(config: ApiConfig, transport: Rc<dyn HttpTransport>) -> Self {
        Self {
            config: Rc::new(config),
            transport,
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn transport(&self) -> Rc<dyn HttpTransport> {
        self.transport.clone()
    }

    async fn fetch_json(&self, request: HttpRequest) -> Result<String, ApiError> {
        let resp = self.transport.send(request).await?;
        if !resp.is_success() {
            return Err(ApiError::Status {
                status: resp.status,
                body: resp.body,
            });
        }
        Ok(resp.body)
    }

    /// All workflows the server knows about.
    pub async fn fetch_workflows(&self) -> Result<Vec<WorkflowRecord>, ApiError> {
        let request = HttpRequest::new(HttpMethod::Get, self.config.workflows_sync_url());
        let body = self.fetch_json(request).await?;
        let parsed: WorkflowListResponse = serde_json::from_str(&body)?;
        Ok(parsed.data)
    }

    pub async fn fetch_environment(&self) -> Result<BTreeMap<String, String>, ApiError> {
        let request = HttpRequest::new(HttpMethod::Get, self.config.environment_url());
        let body = self.fetch_json(request).await?;
        let parsed: EnvironmentResponse = serde_json::from_str(&body)?;
        Ok(parsed.data)
    }

    pub async fn delete_workflow(&self, workflow_id: &str) -> Result<(), ApiError> {
        let payload = serde_json::to_string(&DeleteWorkflowPayload {
            id: workflow_id.to_string(),
        })?;
        let request =
            HttpRequest::new(HttpMethod::Delete, self.config.workflows_sync_url()).with_body(payload);
        self.fetch_json(request).await?;
        Ok(())
    }
}
