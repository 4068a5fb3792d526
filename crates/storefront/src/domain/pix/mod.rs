//! PIX charge issuance: one non-idempotent charge call, then a bounded poll for
//! the QR code the gateway generates asynchronously.

mod reconciler;
mod schedule;
mod sleeper;

pub use reconciler::*;
pub use schedule::*;
pub use sleeper::*;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infra::pix_gateway::GatewayError;

#[derive(Error, Debug)]
pub enum PixError {
    /// Nothing exists at the gateway, checkout has to start over
    #[error("charge creation failed: {0}")]
    ChargeFailed(GatewayError),
    /// The charge exists but the gateway refuses to serve its QR code
    #[error("gateway rejected qr code lookup for charge {external_id}: {source}")]
    QrRejected {
        external_id: String,
        #[source]
        source: GatewayError,
    },
    /// The charge exists but its QR code did not show up in time; it can be fetched again later
    #[error("qr code for charge {external_id} unavailable after {attempts} attempts, last error: {last_error:?}")]
    QrCodeUnavailable {
        external_id: String,
        attempts: u32,
        last_error: Option<String>,
    },
    #[error("qr code lookup for charge {external_id} cancelled after {attempts} attempts")]
    Cancelled { external_id: String, attempts: u32 },
}

impl PixError {
    /// Charge id at the gateway, when one was created
    pub fn external_id(&self) -> Option<&str> {
        match self {
            PixError::ChargeFailed(_) => None,
            PixError::QrRejected { external_id, .. }
            | PixError::QrCodeUnavailable { external_id, .. }
            | PixError::Cancelled { external_id, .. } => Some(external_id),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PixError::ChargeFailed(e) if e.is_retryable() => "GATEWAY_UNAVAILABLE",
            PixError::ChargeFailed(_) | PixError::QrRejected { .. } => "GATEWAY_REJECTED",
            PixError::QrCodeUnavailable { .. } => "QR_UNAVAILABLE",
            PixError::Cancelled { .. } => "CANCELLED",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PixError::ChargeFailed(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            PixError::ChargeFailed(_) | PixError::QrRejected { .. } => StatusCode::BAD_GATEWAY,
            PixError::QrCodeUnavailable { .. } | PixError::Cancelled { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    pub fn public_message(&self) -> &'static str {
        match self {
            PixError::ChargeFailed(e) if e.is_retryable() => {
                "payment provider is unavailable, please try again"
            }
            PixError::ChargeFailed(_) => "payment provider rejected the charge",
            PixError::QrRejected { .. } => "payment provider rejected the charge",
            PixError::QrCodeUnavailable { .. } => {
                "pix qr code is not ready yet, fetch it again in a moment"
            }
            PixError::Cancelled { .. } => "request cancelled before the pix qr code was ready",
        }
    }
}

/// A QR code ready to be shown to the payer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixQrCode {
    /// Copy-and-paste PIX payload
    pub payload: String,
    /// Base64 PNG
    pub encoded_image: String,
    pub expiration_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixCharge {
    pub external_id: String,
    pub qr_code: PixQrCode,
}
