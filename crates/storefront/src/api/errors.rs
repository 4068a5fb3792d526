use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::Error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    /// Set when the charge exists but the QR code is still being generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout: Option<PendingCheckout>,
}

/// What a caller needs to come back for a QR code later
#[derive(Debug, Serialize)]
pub struct PendingCheckout {
    pub checkout_id: Uuid,
    pub external_id: String,
    pub payment_ids: Vec<Uuid>,
    pub ticket_codes: Vec<String>,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        let checkout = match err {
            Error::QrPending { receipt, .. } => Some(PendingCheckout {
                checkout_id: receipt.checkout_id,
                external_id: receipt.external_id.clone(),
                payment_ids: receipt.payments.iter().map(|p| p.id).collect(),
                ticket_codes: receipt
                    .participations
                    .iter()
                    .map(|p| p.ticket_code.clone())
                    .collect(),
            }),
            _ => None,
        };
        ErrorBody {
            error: err.public_message(),
            code: err.code(),
            checkout,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody::from(&self))).into_response()
    }
}

/// Fallback for unknown routes
pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: String::from("route not found"),
            code: "NOT_FOUND",
            checkout: None,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pix::PixError;
    use storefront_core::AdmissionReason;

    #[test]
    fn body_carries_code_and_safe_message() {
        let body = ErrorBody::from(&Error::from(AdmissionReason::WindowClosed));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], "CONTEST_NOT_ACCEPTING");
        assert!(json.get("checkout").is_none());
    }

    #[test]
    fn unavailable_qr_maps_to_503() {
        let err = Error::Pix(PixError::QrCodeUnavailable {
            external_id: String::from("pay_1"),
            attempts: 5,
            last_error: Some(String::from("gateway unavailable with status 502: <html>")),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
