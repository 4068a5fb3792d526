use log::{debug, info};
use rust_decimal::Decimal;
use std::sync::Arc;
use storefront_core::{
    can_accept, sum_amounts, validate_amount, validate_numbers, CodeGenerator, CodeKind,
    ParticipationStatus,
};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{AddParticipation, Participation};
use crate::{
    domain::{unique_code::insert_with_unique_code, ContestStore, Error},
    infra::db::{format_datetime, DBConnection},
};

const PARTICIPATION_COLUMNS: &str = "id, contest_id, user_id, numbers, ticket_code, amount,
    status, current_score, created_at, updated_at";

/// Owns the ticket state machine: `pending -> active`, `pending -> cancelled`
#[derive(Clone)]
pub struct ParticipationLedger {
    db_connection: DBConnection,
    contests: ContestStore,
    codes: Arc<dyn CodeGenerator>,
}

impl ParticipationLedger {
    pub fn new(
        db_connection: DBConnection,
        contests: ContestStore,
        codes: Arc<dyn CodeGenerator>,
    ) -> Self {
        Self {
            db_connection,
            contests,
            codes,
        }
    }

    /// Validates the entry and the contest's admission rules, then stores a
    /// `pending` ticket under a fresh `TK-` code
    pub async fn create(
        &self,
        user_id: &str,
        entry: AddParticipation,
    ) -> Result<Participation, Error> {
        let amount = validate_amount(entry.amount)?;
        let contest = self.contests.get_contest(entry.contest_id).await?;
        validate_numbers(&entry.numbers, &contest.number_rules())?;

        let has_draw = self.contests.has_draw(contest.id).await?;
        can_accept(&contest.admission_window(), has_draw, OffsetDateTime::now_utc())?;

        let id = Uuid::now_v7();
        let contest_id = contest.id;
        let now = format_datetime(OffsetDateTime::now_utc())?;
        let numbers = serde_json::to_string(&entry.numbers)?;

        let participation = insert_with_unique_code(
            self.codes.as_ref(),
            CodeKind::Ticket,
            None,
            "participations.ticket_code",
            |code| {
                let db = self.db_connection.clone();
                let (user_id, numbers, now) = (user_id.to_string(), numbers.clone(), now.clone());
                async move {
                    db.execute_write(move |pool| async move {
                        sqlx::query_as::<_, Participation>(&format!(
                            "INSERT INTO participations (
                                id, contest_id, user_id, numbers, ticket_code, amount, status,
                                current_score, created_at, updated_at
                            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
                            RETURNING {}",
                            PARTICIPATION_COLUMNS
                        ))
                        .bind(id.to_string())
                        .bind(contest_id.to_string())
                        .bind(user_id)
                        .bind(numbers)
                        .bind(code)
                        .bind(amount.to_string())
                        .bind(ParticipationStatus::Pending.as_str())
                        .bind(&now)
                        .bind(&now)
                        .fetch_one(&pool)
                        .await
                    })
                    .await
                }
            },
        )
        .await?;

        info!(
            "created participation {} ({}) in contest {} for {}",
            participation.id, participation.ticket_code, participation.contest_id, user_id
        );
        Ok(participation)
    }

    /// `pending -> active`. Calling it on an active or cancelled ticket
    /// returns the record unchanged.
    pub async fn activate(&self, participation_id: Uuid) -> Result<Participation, Error> {
        let moved = self
            .transition(participation_id, ParticipationStatus::Active)
            .await?;
        match moved {
            Some(participation) => {
                info!("activated participation {}", participation_id);
                Ok(participation)
            }
            None => {
                let current = self.get(participation_id).await?;
                debug!(
                    "participation {} already {}, activate is a no-op",
                    participation_id, current.status
                );
                Ok(current)
            }
        }
    }

    /// `pending -> cancelled`. Active tickets are paid for and cannot be cancelled.
    pub async fn cancel(&self, participation_id: Uuid) -> Result<Participation, Error> {
        let moved = self
            .transition(participation_id, ParticipationStatus::Cancelled)
            .await?;
        if let Some(participation) = moved {
            info!("cancelled participation {}", participation_id);
            return Ok(participation);
        }

        let current = self.get(participation_id).await?;
        match current.status {
            ParticipationStatus::Cancelled => Ok(current),
            status => Err(Error::InvalidState(format!(
                "participation {} is {} and cannot be cancelled",
                participation_id, status
            ))),
        }
    }

    /// Conditional write out of `pending`; `None` when the row was not pending
    async fn transition(
        &self,
        participation_id: Uuid,
        next: ParticipationStatus,
    ) -> Result<Option<Participation>, Error> {
        let now = format_datetime(OffsetDateTime::now_utc())?;
        let moved = self
            .db_connection
            .execute_write(move |pool| async move {
                sqlx::query_as::<_, Participation>(&format!(
                    "UPDATE participations
                     SET status = ?, updated_at = ?
                     WHERE id = ? AND status = ?
                     RETURNING {}",
                    PARTICIPATION_COLUMNS
                ))
                .bind(next.as_str())
                .bind(now)
                .bind(participation_id.to_string())
                .bind(ParticipationStatus::Pending.as_str())
                .fetch_optional(&pool)
                .await
            })
            .await?;
        Ok(moved)
    }

    pub async fn get(&self, participation_id: Uuid) -> Result<Participation, Error> {
        let participation = sqlx::query_as::<_, Participation>(&format!(
            "SELECT {} FROM participations WHERE id = ?",
            PARTICIPATION_COLUMNS
        ))
        .bind(participation_id.to_string())
        .fetch_optional(self.db_connection.read())
        .await?;

        participation.ok_or_else(|| {
            Error::NotFound(format!("participation {} not found", participation_id))
        })
    }

    pub async fn list_pending(&self) -> Result<Vec<Participation>, Error> {
        let participations = sqlx::query_as::<_, Participation>(&format!(
            "SELECT {} FROM participations WHERE status = ? ORDER BY created_at, id",
            PARTICIPATION_COLUMNS
        ))
        .bind(ParticipationStatus::Pending.as_str())
        .fetch_all(self.db_connection.read())
        .await?;
        Ok(participations)
    }

    /// Newest first
    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<Participation>, Error> {
        let participations = sqlx::query_as::<_, Participation>(&format!(
            "SELECT {} FROM participations WHERE user_id = ? ORDER BY created_at DESC, id DESC",
            PARTICIPATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(self.db_connection.read())
        .await?;
        Ok(participations)
    }

    /// Money collected by a contest: captured amounts of its active tickets
    pub async fn sum_active_amounts(&self, contest_id: Uuid) -> Result<Decimal, Error> {
        let amounts: Vec<String> = sqlx::query_scalar(
            "SELECT amount FROM participations WHERE contest_id = ? AND status = ?",
        )
        .bind(contest_id.to_string())
        .bind(ParticipationStatus::Active.as_str())
        .fetch_all(self.db_connection.read())
        .await?;

        let amounts = amounts
            .iter()
            .map(|amount| {
                amount.parse::<Decimal>().map_err(|e| {
                    Error::InvalidState(format!(
                        "stored amount {:?} is not a decimal: {}",
                        amount, e
                    ))
                })
            })
            .collect::<Result<Vec<Decimal>, Error>>()?;
        Ok(sum_amounts(amounts)?)
    }
}
