use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use log::info;
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};
use uuid::Uuid;

use super::pix_gateway::{ChargeCreated, ChargeRequest, GatewayError, PixGateway, QrCodeResponse};

struct MockCharge {
    request: ChargeRequest,
    polls: u32,
}

/// In-memory gateway for local runs. Charges are accepted as-is and the QR code
/// appears once a charge has been polled more than `ready_after_polls` times.
pub struct MockPixGateway {
    ready_after_polls: u32,
    charges: Arc<RwLock<HashMap<String, MockCharge>>>,
}

impl MockPixGateway {
    pub fn new(ready_after_polls: u32) -> Self {
        Self {
            ready_after_polls,
            charges: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn charge_count(&self) -> usize {
        self.charges.read().map(|c| c.len()).unwrap_or_default()
    }

    pub fn charge_amount(&self, external_id: &str) -> Option<rust_decimal::Decimal> {
        self.charges
            .read()
            .ok()?
            .get(external_id)
            .map(|charge| charge.request.amount)
    }
}

fn poisoned() -> GatewayError {
    GatewayError::Unavailable {
        status: 500,
        body: String::from("mock gateway lock poisoned"),
    }
}

#[async_trait]
impl PixGateway for MockPixGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeCreated, GatewayError> {
        let id = format!("pay_{}", Uuid::now_v7().simple());
        info!(
            "mock gateway created charge {} for {} ({})",
            id, request.external_reference, request.amount
        );
        self.charges.write().map_err(|_| poisoned())?.insert(
            id.clone(),
            MockCharge {
                request: request.clone(),
                polls: 0,
            },
        );
        Ok(ChargeCreated {
            id,
            status: String::from("PENDING"),
            due_date: Some(request.due_date.to_string()),
        })
    }

    async fn fetch_qr_code(&self, external_id: &str) -> Result<QrCodeResponse, GatewayError> {
        let mut charges = self.charges.write().map_err(|_| poisoned())?;
        let Some(charge) = charges.get_mut(external_id) else {
            return Err(GatewayError::Rejected {
                status: 404,
                body: format!("charge {} not found", external_id),
            });
        };

        charge.polls += 1;
        if charge.polls <= self.ready_after_polls {
            return Ok(QrCodeResponse::default());
        }

        let expiration = (OffsetDateTime::now_utc() + Duration::days(1))
            .format(&Rfc3339)
            .ok();
        Ok(QrCodeResponse {
            encoded_image: Some(format!("iVBORw0KGgo{}", external_id)),
            payload: Some(format!(
                "00020126580014br.gov.bcb.pix0136{}5204000053039865406{}",
                external_id, charge.request.amount
            )),
            expiration_date: expiration,
        })
    }
}
