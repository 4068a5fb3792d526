//! Checkout and settlement flows built from the ledger, the payment recorder
//! and the PIX reconciler.
//!
//! None of these flows run inside one transaction. Each step is written on its
//! own and the order is chosen so that a failure leaves a state the next call
//! can pick up: cash is recorded before activation, and a PIX charge that
//! exists at the gateway always gets its pending payments recorded.

use itertools::Itertools;
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use storefront_core::{
    sum_amounts, validate_amount, DiscountQuote, DiscountRejection, ParticipationStatus,
    PaymentMethod, PaymentStatus, PrizeSplit,
};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    pix::{PixError, PixQrCode, PixReconciler},
    AddParticipation, ContestStore, Discount, DiscountStore, Error, Participation,
    ParticipationLedger, Payment, PaymentRecorder, PendingPixCharge,
};
use crate::infra::pix_gateway::ChargeRequest;

/// Where a multi-write flow stopped, for operators reading the logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStep {
    CreateParticipation,
    RedeemDiscount,
    CreateCharge,
    ResolveQrCode,
    RecordPayment,
    Activate,
}

impl fmt::Display for SettlementStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::CreateParticipation => "create_participation",
            Self::RedeemDiscount => "redeem_discount",
            Self::CreateCharge => "create_charge",
            Self::ResolveQrCode => "resolve_qr_code",
            Self::RecordPayment => "record_payment",
            Self::Activate => "activate",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashPayment {
    pub amount: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashSettlement {
    pub payment: Payment,
    pub participation: Participation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub contest_id: Uuid,
    pub numbers: Vec<i64>,
    pub amount: Decimal,
}

impl From<CartLine> for AddParticipation {
    fn from(line: CartLine) -> Self {
        AddParticipation {
            contest_id: line.contest_id,
            numbers: line.numbers,
            amount: line.amount,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartCheckout {
    /// Customer id already registered at the gateway
    pub customer_ref: String,
    pub lines: Vec<CartLine>,
    pub discount_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixCheckout {
    pub customer_ref: String,
    #[serde(flatten)]
    pub line: CartLine,
    pub discount_code: Option<String>,
}

impl From<PixCheckout> for CartCheckout {
    fn from(checkout: PixCheckout) -> Self {
        CartCheckout {
            customer_ref: checkout.customer_ref,
            lines: vec![checkout.line],
            discount_code: checkout.discount_code,
        }
    }
}

/// One gateway charge paying for every participation of a checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixCheckoutReceipt {
    pub checkout_id: Uuid,
    pub external_id: String,
    pub total: Decimal,
    pub discount_code: Option<String>,
    pub participations: Vec<Participation>,
    pub payments: Vec<Payment>,
    /// `None` while the gateway has not produced it yet
    pub qr_code: Option<PixQrCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshedQrCode {
    pub external_id: String,
    pub qr_code: PixQrCode,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedCharge {
    pub external_id: String,
    pub payments: Vec<Payment>,
    pub participations: Vec<Participation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizePool {
    pub contest_id: Uuid,
    pub split: PrizeSplit,
}

/// A coupon already checked against every line of a checkout
struct AppliedDiscount {
    discount: Discount,
    quotes: Vec<Option<DiscountQuote>>,
}

#[derive(Clone)]
pub struct SettlementOrchestrator {
    contests: ContestStore,
    ledger: ParticipationLedger,
    payments: PaymentRecorder,
    discounts: DiscountStore,
    pix: PixReconciler,
}

impl SettlementOrchestrator {
    pub fn new(
        contests: ContestStore,
        ledger: ParticipationLedger,
        payments: PaymentRecorder,
        discounts: DiscountStore,
        pix: PixReconciler,
    ) -> Self {
        Self {
            contests,
            ledger,
            payments,
            discounts,
            pix,
        }
    }

    pub async fn create_participation(
        &self,
        user_id: &str,
        entry: AddParticipation,
    ) -> Result<Participation, Error> {
        self.ledger.create(user_id, entry).await
    }

    pub async fn activate_participation(
        &self,
        participation_id: Uuid,
    ) -> Result<Participation, Error> {
        self.ledger.activate(participation_id).await
    }

    pub async fn cancel_participation(
        &self,
        participation_id: Uuid,
    ) -> Result<Participation, Error> {
        self.ledger.cancel(participation_id).await
    }

    /// Desk confirmation of a cash payment: record it `paid`, then activate.
    ///
    /// The two writes are not atomic. If activation fails the payment stays and
    /// calling this again (or activating) finishes the job.
    pub async fn register_cash_payment(
        &self,
        participation_id: Uuid,
        cash: CashPayment,
    ) -> Result<CashSettlement, Error> {
        let participation = self.ledger.get(participation_id).await?;
        if participation.status == ParticipationStatus::Cancelled {
            return Err(Error::InvalidState(format!(
                "participation {} is cancelled",
                participation_id
            )));
        }

        let contest = self.contests.get_contest(participation.contest_id).await?;
        let amount = validate_amount(cash.amount)?;
        // Contests without a fixed price are capped by what the ticket was sold for
        let limit = contest
            .participation_value
            .unwrap_or(participation.amount);
        if amount > limit {
            warn!(
                "refusing cash payment of {} for participation {}: contest value is {}",
                amount, participation_id, limit
            );
            return Err(Error::AmountExceedsContestValue { amount, limit });
        }

        let payment = match self
            .payments
            .record_cash(participation_id, amount, cash.notes)
            .await
        {
            Ok(payment) => payment,
            Err(Error::AlreadyPaid(_)) => {
                let existing = self
                    .payments
                    .find_paid_for(participation_id)
                    .await?
                    .ok_or_else(|| {
                        Error::InvalidState(format!(
                            "participation {} reported paid but no paid payment found",
                            participation_id
                        ))
                    })?;
                warn!(
                    "participation {} already paid by {}, re-running activation",
                    participation_id, existing.id
                );
                existing
            }
            Err(e) => return Err(step_failed(SettlementStep::RecordPayment, &participation_id, e)),
        };

        let participation = self
            .ledger
            .activate(participation_id)
            .await
            .map_err(|e| step_failed(SettlementStep::Activate, &participation_id, e))?;

        Ok(CashSettlement {
            payment,
            participation,
        })
    }

    pub async fn pix_checkout(
        &self,
        user_id: &str,
        checkout: PixCheckout,
        cancel: &CancellationToken,
    ) -> Result<PixCheckoutReceipt, Error> {
        self.cart_checkout(user_id, checkout.into(), cancel).await
    }

    /// Creates one pending participation per line, then a single PIX charge for
    /// their sum. Lines are created in order; a failing line releases the ones
    /// before it.
    pub async fn cart_checkout(
        &self,
        user_id: &str,
        checkout: CartCheckout,
        cancel: &CancellationToken,
    ) -> Result<PixCheckoutReceipt, Error> {
        if checkout.lines.is_empty() {
            return Err(Error::BadRequest(String::from("cart is empty")));
        }
        if checkout.customer_ref.trim().is_empty() {
            return Err(Error::BadRequest(String::from("customer_ref is required")));
        }

        for line in &checkout.lines {
            validate_amount(line.amount)?;
        }

        let checkout_id = Uuid::now_v7();
        let applied = match &checkout.discount_code {
            Some(code) => Some(self.apply_discount(code, &checkout.lines).await?),
            None => None,
        };
        let prices: Vec<Decimal> = checkout
            .lines
            .iter()
            .enumerate()
            .map(|(index, line)| match applied.as_ref().map(|a| a.quotes[index]) {
                Some(Some(quote)) => quote.final_price,
                _ => line.amount,
            })
            .collect();
        // Checked before any ticket is written
        let mut total = sum_amounts(prices.iter().copied())?;
        total.rescale(2);

        let mut participations: Vec<Participation> = Vec::with_capacity(checkout.lines.len());
        for (line, price) in checkout.lines.into_iter().zip(prices) {
            let mut entry = AddParticipation::from(line);
            entry.amount = price;
            match self.ledger.create(user_id, entry).await {
                Ok(participation) => participations.push(participation),
                Err(e) if participations.is_empty() => return Err(e),
                Err(e) => {
                    self.release(&participations, None).await;
                    return Err(step_failed(
                        SettlementStep::CreateParticipation,
                        &checkout_id,
                        e,
                    ));
                }
            }
        }

        let discount_id = applied.as_ref().map(|a| a.discount.id);
        if let Some(discount_id) = discount_id {
            if let Err(e) = self.discounts.redeem(discount_id).await {
                self.release(&participations, None).await;
                return Err(step_failed(SettlementStep::RedeemDiscount, &checkout_id, e));
            }
        }

        let ticket_codes: Vec<String> = participations
            .iter()
            .map(|p| p.ticket_code.clone())
            .collect();
        let request = ChargeRequest {
            customer_ref: checkout.customer_ref,
            amount: total,
            due_date: self.pix.due_date(OffsetDateTime::now_utc()),
            description: format!("Tickets {}", ticket_codes.iter().join(", ")),
            external_reference: checkout_id.to_string(),
        };

        let created = match self.pix.create_charge(&request).await {
            Ok(created) => created,
            Err(e) => {
                self.release(&participations, discount_id).await;
                return Err(step_failed(SettlementStep::CreateCharge, &checkout_id, e.into()));
            }
        };
        let external_id = created.id;

        let (qr_code, qr_error) = match self.pix.resolve_qr_code(&external_id, cancel).await {
            Ok(qr_code) => (Some(qr_code), None),
            Err(e @ PixError::QrRejected { .. }) => {
                self.release(&participations, discount_id).await;
                return Err(step_failed(SettlementStep::ResolveQrCode, &external_id, e.into()));
            }
            // The charge exists, so the payments are recorded and the QR can be fetched later
            Err(e) => (None, Some(e)),
        };

        let charge = PendingPixCharge {
            external_id: external_id.clone(),
            qr_code: qr_code.clone(),
            ticket_codes,
        };
        let mut payments = Vec::with_capacity(participations.len());
        for participation in &participations {
            let payment = self
                .payments
                .record_pix_pending(participation.id, participation.amount, &charge)
                .await
                .map_err(|e| {
                    error!(
                        "charge {} exists at the gateway but participation {} has no payment",
                        external_id, participation.id
                    );
                    step_failed(SettlementStep::RecordPayment, &external_id, e)
                })?;
            payments.push(payment);
        }

        let receipt = PixCheckoutReceipt {
            checkout_id,
            external_id,
            total,
            discount_code: applied.map(|a| a.discount.code),
            participations,
            payments,
            qr_code,
        };

        match qr_error {
            None => {
                info!(
                    "checkout {} issued pix charge {} for {} ticket(s), total {}",
                    receipt.checkout_id,
                    receipt.external_id,
                    receipt.participations.len(),
                    receipt.total
                );
                Ok(receipt)
            }
            Some(source) => {
                warn!(
                    "checkout {} recorded charge {} without a qr code: {}",
                    receipt.checkout_id, receipt.external_id, source
                );
                Err(Error::QrPending {
                    receipt: Box::new(receipt),
                    source,
                })
            }
        }
    }

    /// Quote the coupon for every line. It has to apply to at least one.
    async fn apply_discount(
        &self,
        code: &str,
        lines: &[CartLine],
    ) -> Result<AppliedDiscount, Error> {
        let discount = self.discounts.find_by_code(code).await?;
        let now = OffsetDateTime::now_utc();

        let mut quotes = Vec::with_capacity(lines.len());
        for line in lines {
            match discount.terms.quote(line.contest_id, line.amount, now) {
                Ok(quote) => quotes.push(Some(quote)),
                Err(DiscountRejection::WrongContest) => quotes.push(None),
                Err(rejection) => return Err(rejection.into()),
            }
        }
        if quotes.iter().all(Option::is_none) {
            return Err(DiscountRejection::WrongContest.into());
        }
        Ok(AppliedDiscount { discount, quotes })
    }

    /// Best effort undo for a checkout that failed before a usable charge existed
    async fn release(&self, participations: &[Participation], discount_id: Option<Uuid>) {
        for participation in participations {
            if let Err(e) = self.ledger.cancel(participation.id).await {
                error!(
                    "failed to release participation {} after checkout failure: {}",
                    participation.id, e
                );
            }
        }
        if let Some(discount_id) = discount_id {
            if let Err(e) = self.discounts.release(discount_id).await {
                error!("failed to give back use of discount {}: {}", discount_id, e);
            }
        }
    }

    /// Poll the gateway again for a charge whose QR code was not ready at checkout
    pub async fn refresh_pix_qr(
        &self,
        payment_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<RefreshedQrCode, Error> {
        let payment = self.payments.get(payment_id).await?;
        let external_id = match (&payment.payment_method, &payment.external_id) {
            (PaymentMethod::Pix, Some(external_id)) => external_id.clone(),
            _ => {
                return Err(Error::InvalidState(format!(
                    "payment {} is not a pix charge",
                    payment_id
                )))
            }
        };
        if payment.status != PaymentStatus::Pending {
            return Err(Error::InvalidState(format!(
                "payment {} is {}",
                payment_id, payment.status
            )));
        }

        if let Some(qr_code) = payment.qr_code() {
            return Ok(RefreshedQrCode {
                external_id: external_id.clone(),
                qr_code: qr_code.clone(),
                payments: self.payments.list_by_external_id(&external_id).await?,
            });
        }

        let qr_code = self
            .pix
            .resolve_qr_code(&external_id, cancel)
            .await
            .map_err(|e| step_failed(SettlementStep::ResolveQrCode, &external_id, e.into()))?;
        let payments = self.payments.attach_qr_code(&external_id, &qr_code).await?;

        Ok(RefreshedQrCode {
            external_id,
            qr_code,
            payments,
        })
    }

    /// Gateway confirmed the charge: mark each of its payments paid and activate
    /// the tickets. Safe to call again for the same charge.
    pub async fn confirm_pix_charge(&self, external_id: &str) -> Result<ConfirmedCharge, Error> {
        let payments = self.payments.list_by_external_id(external_id).await?;
        if payments.is_empty() {
            return Err(Error::NotFound(format!(
                "no payments for charge {}",
                external_id
            )));
        }

        let mut confirmed = ConfirmedCharge {
            external_id: external_id.to_string(),
            payments: Vec::with_capacity(payments.len()),
            participations: Vec::with_capacity(payments.len()),
        };

        for payment in payments {
            let payment = match payment.status {
                PaymentStatus::Pending | PaymentStatus::Paid => {
                    match self.payments.mark_paid(payment.id).await {
                        Ok(paid) => paid,
                        Err(Error::AlreadyPaid(participation_id)) => {
                            warn!(
                                "charge {} pays participation {} which was already paid, refund needed",
                                external_id, participation_id
                            );
                            payment
                        }
                        Err(e) => {
                            return Err(step_failed(SettlementStep::RecordPayment, &external_id, e))
                        }
                    }
                }
                status => {
                    warn!(
                        "skipping {} payment {} of charge {}",
                        status, payment.id, external_id
                    );
                    continue;
                }
            };

            let participation = self
                .ledger
                .activate(payment.participation_id)
                .await
                .map_err(|e| step_failed(SettlementStep::Activate, &payment.participation_id, e))?;
            if participation.status == ParticipationStatus::Cancelled {
                warn!(
                    "charge {} paid for cancelled participation {}, refund needed",
                    external_id, participation.id
                );
            }

            confirmed.payments.push(payment);
            confirmed.participations.push(participation);
        }

        info!(
            "confirmed pix charge {} covering {} participation(s)",
            external_id,
            confirmed.participations.len()
        );
        Ok(confirmed)
    }

    /// Current pool of a contest and how it would be divided
    pub async fn prize_pool(&self, contest_id: Uuid) -> Result<PrizePool, Error> {
        let contest = self.contests.get_contest(contest_id).await?;
        let pool = self.ledger.sum_active_amounts(contest_id).await?;
        Ok(PrizePool {
            contest_id,
            split: contest.prize_distribution.split(pool),
        })
    }
}

fn step_failed(step: SettlementStep, subject: &dyn fmt::Display, err: Error) -> Error {
    error!("settlement step {} failed for {}: {}", step, subject, err);
    err.at_step(step)
}
