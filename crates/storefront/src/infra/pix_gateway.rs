use anyhow::anyhow;
use hyper::header::CONTENT_TYPE;
use log::{debug, error};
use mime::APPLICATION_JSON;
use reqwest_middleware::{
    reqwest::{Method, Response, Url},
    ClientWithMiddleware,
};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};
use thiserror::Error;
use time::{macros::format_description, Date};

use crate::config::PixSettings;

const ACCESS_TOKEN_HEADER: &str = "access_token";

#[derive(Error, Debug)]
pub enum GatewayError {
    /// 4xx: the request or the charge itself is invalid, retrying cannot help
    #[error("gateway rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    /// 5xx: the gateway is struggling, a later attempt may succeed
    #[error("gateway unavailable with status {status}: {body}")]
    Unavailable { status: u16, body: String },
    #[error("gateway request timed out after {0:?}")]
    Timeout(Duration),
    #[error("problem sending request to gateway: {0}")]
    Send(#[from] reqwest_middleware::Error),
    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
    #[error("problem building gateway request: {0}")]
    Request(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Unavailable { .. }
                | GatewayError::Timeout(_)
                | GatewayError::Send(_)
                | GatewayError::InvalidResponse(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Customer id already registered at the gateway
    pub customer_ref: String,
    pub amount: Decimal,
    pub due_date: Date,
    pub description: String,
    /// Our own reference, echoed back by gateway webhooks
    pub external_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeCreated {
    pub id: String,
    pub status: String,
    pub due_date: Option<String>,
}

/// Raw QR lookup, any field may still be missing while the gateway generates it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeResponse {
    pub encoded_image: Option<String>,
    pub payload: Option<String>,
    pub expiration_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentBody<'a> {
    customer: &'a str,
    billing_type: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    value: Decimal,
    due_date: String,
    description: &'a str,
    external_reference: &'a str,
}

#[async_trait::async_trait]
pub trait PixGateway: Send + Sync {
    /// `POST /payments`
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeCreated, GatewayError>;
    /// `GET /payments/{id}/pixQrCode`
    async fn fetch_qr_code(&self, external_id: &str) -> Result<QrCodeResponse, GatewayError>;
}

/// Asaas v3 REST client
#[derive(Clone)]
pub struct AsaasClient {
    pub base_url: Url,
    pub client: ClientWithMiddleware,
    api_key: SecretString,
    request_timeout: Duration,
}

impl AsaasClient {
    pub fn new(
        client: ClientWithMiddleware,
        settings: &PixSettings,
    ) -> Result<Self, anyhow::Error> {
        let api_key = get_api_key(&settings.api_key_file)?;
        Ok(Self {
            base_url: Url::parse(&settings.base_url)?,
            client,
            api_key,
            request_timeout: settings.request_timeout(),
        })
    }

    async fn send_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Response, GatewayError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let mut request = self
            .client
            .request(method, url)
            .header(ACCESS_TOKEN_HEADER, self.api_key.expose_secret())
            .header(CONTENT_TYPE, APPLICATION_JSON.to_string())
            .timeout(self.request_timeout);

        if let Some(b) = body {
            request = request.body(b);
        }

        let response = match tokio::time::timeout(self.request_timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(reqwest_middleware::Error::Reqwest(e))) if e.is_timeout() => {
                return Err(GatewayError::Timeout(self.request_timeout))
            }
            Ok(Err(e)) => {
                error!("error sending to gateway: {}", e);
                return Err(GatewayError::Send(e));
            }
            Err(_) => return Err(GatewayError::Timeout(self.request_timeout)),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(GatewayError::Unavailable {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn send_json<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
    {
        let response = self.send_request(method, path, body).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl PixGateway for AsaasClient {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeCreated, GatewayError> {
        let due_date = request
            .due_date
            .format(format_description!("[year]-[month]-[day]"))
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let body = serde_json::to_vec(&CreatePaymentBody {
            customer: &request.customer_ref,
            billing_type: "PIX",
            value: request.amount,
            due_date,
            description: &request.description,
            external_reference: &request.external_reference,
        })
        .map_err(|e| GatewayError::Request(format!("Failed to serialize charge: {}", e)))?;

        debug!(
            "creating pix charge for {} ({})",
            request.external_reference, request.amount
        );
        self.send_json::<ChargeCreated>(Method::POST, "payments", Some(body))
            .await
    }

    async fn fetch_qr_code(&self, external_id: &str) -> Result<QrCodeResponse, GatewayError> {
        self.send_json::<QrCodeResponse>(
            Method::GET,
            &format!("payments/{}/pixQrCode", external_id),
            None,
        )
        .await
    }
}

pub fn get_api_key(file_path: &str) -> Result<SecretString, anyhow::Error> {
    if !Path::new(file_path).exists() {
        return Err(anyhow!("Gateway api key file not found: {}", file_path));
    }
    let contents =
        fs::read_to_string(file_path).map_err(|e| anyhow!("Failed to read api key file: {}", e))?;
    let key = contents.trim();
    if key.is_empty() {
        return Err(anyhow!("Gateway api key file is empty: {}", file_path));
    }
    Ok(SecretString::from(key.to_string()))
}
