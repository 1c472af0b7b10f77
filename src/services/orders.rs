//! Order service API wrappers.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    fare::FareConfig,
    order::{Order, OrderAction, OrderCreate, OrderUpdate},
};

/// Header carrying the host-provided identity token.
pub const INIT_DATA_HEADER: &str = "X-Telegram-Init-Data";

/// Failures talking to the order service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server answered with a non-2xx status.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// A 2xx body that could not be decoded.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Text for the form message line after a failed submission.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Rejected { message, .. } => format!("Error: {message}"),
            ApiError::Network(_) => "Network error. Please try again.".into(),
            ApiError::Decode(_) => "Error: Server error".into(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Error body. The UI reads `message`; the server's exception handler fills `error`.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Operations the client performs against the order service.
#[async_trait]
pub trait OrderApi: Send + Sync {
    /// `None` when the server answers 204 (no order at all).
    async fn current_order(&self) -> Result<Option<Order>, ApiError>;
    async fn create_order(&self, body: &OrderCreate) -> Result<Order, ApiError>;
    async fn get_order(&self, id: i64) -> Result<Order, ApiError>;
    async fn cancel_order(&self, id: i64) -> Result<(), ApiError>;
    async fn fare_config(&self) -> Result<FareConfig, ApiError>;
}

/// reqwest-backed implementation.
#[derive(Clone)]
pub struct HttpOrderApi {
    http: Client,
    base_url: String,
    init_data: String,
}

impl HttpOrderApi {
    pub fn new(http: Client, base_url: &str, init_data: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            init_data: init_data.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(INIT_DATA_HEADER, &self.init_data)
    }
}

/// Turn a non-2xx response into `ApiError::Rejected`, keeping the server's message.
async fn ensure_success(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(rejection(status, &text))
}

fn rejection(status: StatusCode, body: &str) -> ApiError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.error)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "Server error".to_string());
    ApiError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl OrderApi for HttpOrderApi {
    async fn current_order(&self) -> Result<Option<Order>, ApiError> {
        let resp = self
            .authed(self.http.get(self.url("/api/orders/current")))
            .send()
            .await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let resp = ensure_success(resp).await?;
        Ok(Some(resp.json::<Order>().await?))
    }

    async fn create_order(&self, body: &OrderCreate) -> Result<Order, ApiError> {
        let resp = self
            .authed(self.http.post(self.url("/api/orders")))
            .json(body)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        Ok(resp.json::<Order>().await?)
    }

    async fn get_order(&self, id: i64) -> Result<Order, ApiError> {
        let resp = self
            .authed(self.http.get(self.url(&format!("/api/orders/{id}"))))
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        Ok(resp.json::<Order>().await?)
    }

    async fn cancel_order(&self, id: i64) -> Result<(), ApiError> {
        let body = OrderUpdate {
            action: OrderAction::CancelByClient,
        };
        let resp = self
            .authed(self.http.patch(self.url(&format!("/api/orders/{id}"))))
            .json(&body)
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }

    async fn fare_config(&self) -> Result<FareConfig, ApiError> {
        let resp = self.http.get(self.url("/api/config")).send().await?;
        let resp = ensure_success(resp).await?;
        Ok(resp.json::<FareConfig>().await?)
    }
}
