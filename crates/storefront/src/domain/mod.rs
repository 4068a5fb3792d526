mod contests;
mod discounts;
mod participations;
mod payments;
pub mod pix;
mod settlement;
#[cfg(test)]
pub(crate) mod test_support;
mod unique_code;

pub use contests::*;
pub use discounts::*;
pub use participations::*;
pub use payments::*;
pub use settlement::*;

use axum::http::StatusCode;
use rust_decimal::Decimal;
use storefront_core::{AdmissionReason, CodeKind, CoreError, DiscountRejection};
use thiserror::Error;
use uuid::Uuid;

use crate::infra::db::DatabaseWriteError;
use pix::PixError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] CoreError),
    #[error("{0}")]
    NotAccepting(#[from] AdmissionReason),
    #[error("amount {amount} exceeds contest value {limit}")]
    AmountExceedsContestValue { amount: Decimal, limit: Decimal },
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("participation {0} already has a paid payment")]
    AlreadyPaid(Uuid),
    #[error("could not allocate a unique {kind} code after {attempts} attempts")]
    CodeExhausted { kind: CodeKind, attempts: u32 },
    #[error(transparent)]
    Pix(#[from] PixError),
    #[error("discount rejected: {0}")]
    Discount(#[from] DiscountRejection),
    #[error("{0}")]
    BadRequest(String),
    #[error("problem querying db: {0}")]
    DbError(#[from] sqlx::Error),
    #[error("database busy: {0}")]
    DbBusy(String),
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// Checkout recorded its charge and payments but has no QR code to show yet
    #[error("checkout {} is waiting for its qr code: {source}", .receipt.checkout_id)]
    QrPending {
        receipt: Box<PixCheckoutReceipt>,
        #[source]
        source: PixError,
    },
    /// A settlement step failed after earlier steps already wrote something
    #[error("settlement step {step} failed: {source}")]
    Settlement {
        step: SettlementStep,
        #[source]
        source: Box<Error>,
    },
}

impl From<DatabaseWriteError> for Error {
    fn from(value: DatabaseWriteError) -> Self {
        match value {
            DatabaseWriteError::Sqlx(e) => Error::DbError(e),
            e => Error::DbBusy(e.to_string()),
        }
    }
}

impl Error {
    pub fn at_step(self, step: SettlementStep) -> Self {
        match self {
            Error::Settlement { .. } => self,
            other => Error::Settlement {
                step,
                source: Box::new(other),
            },
        }
    }

    /// Stable code handed to callers
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(CoreError::InvalidNumbers(_)) => "INVALID_NUMBERS",
            Error::Validation(CoreError::InvalidAmount(_)) => "AMOUNT_INVALID",
            Error::Validation(CoreError::Validation(_))
            | Error::BadRequest(_)
            | Error::Discount(_)
            | Error::InvalidJson(_) => "VALIDATION_FAILED",
            Error::NotAccepting(_) => "CONTEST_NOT_ACCEPTING",
            Error::AmountExceedsContestValue { .. } => "AMOUNT_EXCEEDS_CONTEST_VALUE",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidState(_) | Error::AlreadyPaid(_) => "INVALID_STATE",
            Error::CodeExhausted { .. } => "CODE_EXHAUSTED",
            Error::Pix(e) | Error::QrPending { source: e, .. } => e.code(),
            Error::DbError(_) | Error::DbBusy(_) => "INTERNAL",
            Error::Settlement { source, .. } => source.code(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) | Error::InvalidJson(_) => StatusCode::BAD_REQUEST,
            Error::Validation(_)
            | Error::AmountExceedsContestValue { .. }
            | Error::Discount(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotAccepting(_) | Error::InvalidState(_) | Error::AlreadyPaid(_) => {
                StatusCode::CONFLICT
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Pix(e) | Error::QrPending { source: e, .. } => e.status(),
            Error::CodeExhausted { .. } | Error::DbError(_) | Error::DbBusy(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::Settlement { source, .. } => source.status(),
        }
    }

    /// Message safe to show to an end user. Gateway bodies and db details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Error::Pix(e) | Error::QrPending { source: e, .. } => e.public_message().to_string(),
            Error::DbError(_) | Error::DbBusy(_) | Error::CodeExhausted { .. } => {
                String::from("internal server error")
            }
            Error::Settlement { source, .. } => source.public_message(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::pix_gateway::GatewayError;

    #[test]
    fn admission_reasons_are_shown_verbatim() {
        let err = Error::from(AdmissionReason::DrawPerformed);
        assert_eq!(err.code(), "CONTEST_NOT_ACCEPTING");
        assert_eq!(err.public_message(), "draw already performed");
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn validation_errors_map_to_their_codes() {
        let numbers = Error::from(CoreError::InvalidNumbers("expected 6 numbers, got 3".into()));
        assert_eq!(numbers.code(), "INVALID_NUMBERS");
        let amount = Error::from(CoreError::InvalidAmount("amount must be positive".into()));
        assert_eq!(amount.code(), "AMOUNT_INVALID");
        let exceeds = Error::AmountExceedsContestValue {
            amount: "12.00".parse().unwrap(),
            limit: "10.00".parse().unwrap(),
        };
        assert_eq!(exceeds.code(), "AMOUNT_EXCEEDS_CONTEST_VALUE");
    }

    #[test]
    fn gateway_details_never_reach_callers() {
        let err = Error::from(PixError::ChargeFailed(GatewayError::Rejected {
            status: 400,
            body: String::from("{\"errors\":[{\"code\":\"invalid_customer\"}]}"),
        }))
        .at_step(SettlementStep::CreateCharge);

        assert_eq!(err.code(), "GATEWAY_REJECTED");
        assert!(!err.public_message().contains("invalid_customer"));
        assert!(err.to_string().contains("create_charge"));
    }

    #[test]
    fn internal_failures_hide_details() {
        let err = Error::CodeExhausted {
            kind: CodeKind::Ticket,
            attempts: 10,
        };
        assert_eq!(err.code(), "CODE_EXHAUSTED");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "internal server error");
    }
}
