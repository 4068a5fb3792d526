use log::{debug, info};
use rust_decimal::Decimal;
use storefront_core::{validate_amount, PaymentMethod, PaymentStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ExternalData, Payment};
use crate::{
    domain::{pix::PixQrCode, Error},
    infra::db::{format_datetime, is_unique_violation_on, DBConnection, DatabaseWriteError},
};

const PAYMENT_COLUMNS: &str = "id, participation_id, amount, status, payment_method, external_id,
    external_data, paid_at, created_at, updated_at";

/// Unique index allowing a single `paid` row per participation
const ONE_PAID_COLUMN: &str = "payments.participation_id";

/// A gateway charge as seen by one of the participations it pays for
#[derive(Debug, Clone)]
pub struct PendingPixCharge {
    pub external_id: String,
    pub qr_code: Option<PixQrCode>,
    pub ticket_codes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PaymentRecorder {
    db_connection: DBConnection,
}

impl PaymentRecorder {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }

    /// Cash is collected at the desk, so it is stored already `paid`.
    /// The caller still has to activate the participation.
    pub async fn record_cash(
        &self,
        participation_id: Uuid,
        amount: Decimal,
        notes: Option<String>,
    ) -> Result<Payment, Error> {
        let amount = validate_amount(amount)?;
        let external_data = ExternalData::Cash { notes };
        let now = OffsetDateTime::now_utc();

        let payment = self
            .insert(
                participation_id,
                amount,
                PaymentStatus::Paid,
                PaymentMethod::Cash,
                None,
                &external_data,
                Some(now),
            )
            .await?;

        info!(
            "recorded cash payment {} of {} for participation {}",
            payment.id, amount, participation_id
        );
        Ok(payment)
    }

    /// PIX payments wait as `pending` until the gateway confirms the charge
    pub async fn record_pix_pending(
        &self,
        participation_id: Uuid,
        amount: Decimal,
        charge: &PendingPixCharge,
    ) -> Result<Payment, Error> {
        let amount = validate_amount(amount)?;
        let external_data = ExternalData::Pix {
            qr_code: charge.qr_code.clone(),
            ticket_codes: charge.ticket_codes.clone(),
        };

        let payment = self
            .insert(
                participation_id,
                amount,
                PaymentStatus::Pending,
                PaymentMethod::Pix,
                Some(charge.external_id.clone()),
                &external_data,
                None,
            )
            .await?;

        info!(
            "recorded pending pix payment {} of {} for participation {} (charge {})",
            payment.id, amount, participation_id, charge.external_id
        );
        Ok(payment)
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert(
        &self,
        participation_id: Uuid,
        amount: Decimal,
        status: PaymentStatus,
        method: PaymentMethod,
        external_id: Option<String>,
        external_data: &ExternalData,
        paid_at: Option<OffsetDateTime>,
    ) -> Result<Payment, Error> {
        let id = Uuid::now_v7();
        let now = format_datetime(OffsetDateTime::now_utc())?;
        let paid_at = paid_at.map(format_datetime).transpose()?;
        let external_data = serde_json::to_string(external_data)?;

        self.db_connection
            .execute_write(move |pool| async move {
                sqlx::query_as::<_, Payment>(&format!(
                    "INSERT INTO payments (
                        id, participation_id, amount, status, payment_method, external_id,
                        external_data, paid_at, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    RETURNING {}",
                    PAYMENT_COLUMNS
                ))
                .bind(id.to_string())
                .bind(participation_id.to_string())
                .bind(amount.to_string())
                .bind(status.as_str())
                .bind(method.as_str())
                .bind(external_id)
                .bind(external_data)
                .bind(paid_at)
                .bind(&now)
                .bind(&now)
                .fetch_one(&pool)
                .await
            })
            .await
            .map_err(|e| already_paid_or(e, participation_id))
    }

    /// `pending -> paid`; an already paid payment is returned unchanged
    pub async fn mark_paid(&self, payment_id: Uuid) -> Result<Payment, Error> {
        let current = self.get(payment_id).await?;
        match current.status {
            PaymentStatus::Paid => {
                debug!("payment {} already paid", payment_id);
                return Ok(current);
            }
            PaymentStatus::Pending => {}
            status => {
                return Err(Error::InvalidState(format!(
                    "payment {} is {} and cannot be paid",
                    payment_id, status
                )))
            }
        }

        let now = format_datetime(OffsetDateTime::now_utc())?;
        let participation_id = current.participation_id;
        let moved = self
            .db_connection
            .execute_write(move |pool| async move {
                sqlx::query_as::<_, Payment>(&format!(
                    "UPDATE payments
                     SET status = ?, paid_at = ?, updated_at = ?
                     WHERE id = ? AND status = ?
                     RETURNING {}",
                    PAYMENT_COLUMNS
                ))
                .bind(PaymentStatus::Paid.as_str())
                .bind(&now)
                .bind(&now)
                .bind(payment_id.to_string())
                .bind(PaymentStatus::Pending.as_str())
                .fetch_optional(&pool)
                .await
            })
            .await
            .map_err(|e| already_paid_or(e, participation_id))?;

        match moved {
            Some(payment) => {
                info!(
                    "payment {} for participation {} marked paid",
                    payment_id, participation_id
                );
                Ok(payment)
            }
            // Lost a race with another confirmation
            None => self.get(payment_id).await,
        }
    }

    /// Store a late QR code on every still pending payment of a charge
    pub async fn attach_qr_code(
        &self,
        external_id: &str,
        qr_code: &PixQrCode,
    ) -> Result<Vec<Payment>, Error> {
        let payments = self.list_by_external_id(external_id).await?;
        let now = format_datetime(OffsetDateTime::now_utc())?;
        let updates = payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Pending)
            .map(|p| -> Result<(String, String), Error> {
                let ticket_codes = match &p.external_data {
                    Some(ExternalData::Pix { ticket_codes, .. }) => ticket_codes.clone(),
                    _ => vec![],
                };
                let data = serde_json::to_string(&ExternalData::Pix {
                    qr_code: Some(qr_code.clone()),
                    ticket_codes,
                })?;
                Ok((p.id.to_string(), data))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.db_connection
            .execute_write(move |pool| async move {
                for (id, data) in updates {
                    sqlx::query(
                        "UPDATE payments SET external_data = ?, updated_at = ?
                         WHERE id = ? AND status = 'pending'",
                    )
                    .bind(data)
                    .bind(&now)
                    .bind(id)
                    .execute(&pool)
                    .await?;
                }
                Ok(())
            })
            .await?;

        debug!("attached qr code to payments of charge {}", external_id);
        self.list_by_external_id(external_id).await
    }

    pub async fn get(&self, payment_id: Uuid) -> Result<Payment, Error> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE id = ?",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id.to_string())
        .fetch_optional(self.db_connection.read())
        .await?;

        payment.ok_or_else(|| Error::NotFound(format!("payment {} not found", payment_id)))
    }

    /// Every attempt for a participation, oldest first
    pub async fn list_for(&self, participation_id: Uuid) -> Result<Vec<Payment>, Error> {
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE participation_id = ? ORDER BY created_at, id",
            PAYMENT_COLUMNS
        ))
        .bind(participation_id.to_string())
        .fetch_all(self.db_connection.read())
        .await?;
        Ok(payments)
    }

    pub async fn find_paid_for(&self, participation_id: Uuid) -> Result<Option<Payment>, Error> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE participation_id = ? AND status = ?",
            PAYMENT_COLUMNS
        ))
        .bind(participation_id.to_string())
        .bind(PaymentStatus::Paid.as_str())
        .fetch_optional(self.db_connection.read())
        .await?;
        Ok(payment)
    }

    /// All payments settled by one gateway charge
    pub async fn list_by_external_id(&self, external_id: &str) -> Result<Vec<Payment>, Error> {
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE external_id = ? ORDER BY created_at, id",
            PAYMENT_COLUMNS
        ))
        .bind(external_id)
        .fetch_all(self.db_connection.read())
        .await?;
        Ok(payments)
    }
}

fn already_paid_or(err: DatabaseWriteError, participation_id: Uuid) -> Error {
    match err {
        DatabaseWriteError::Sqlx(e) if is_unique_violation_on(&e, ONE_PAID_COLUMN) => {
            Error::AlreadyPaid(participation_id)
        }
        e => e.into(),
    }
}
