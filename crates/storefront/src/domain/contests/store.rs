use log::info;
use std::sync::Arc;
use storefront_core::{validate_numbers, CodeGenerator, CodeKind, ContestStatus, NumberRules};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{AddDraw, Contest, ContestUpdate, Draw, NewContest};
use crate::{
    domain::{unique_code::insert_with_unique_code, Error},
    infra::db::{format_datetime, DBConnection},
};

const CONTEST_COLUMNS: &str = "id, contest_code, name, description, min_number, max_number,
    numbers_per_participation, start_date, end_date, status, participation_value,
    first_place_pct, second_place_pct, lowest_place_pct, admin_fee_pct, created_at, updated_at";

#[derive(Clone)]
pub struct ContestStore {
    db_connection: DBConnection,
    codes: Arc<dyn CodeGenerator>,
}

impl ContestStore {
    pub fn new(db_connection: DBConnection, codes: Arc<dyn CodeGenerator>) -> Self {
        Self {
            db_connection,
            codes,
        }
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        self.db_connection.ping().await
    }

    pub async fn create_contest(&self, contest: NewContest) -> Result<Contest, Error> {
        let participation_value = contest.validate()?;
        let id = Uuid::now_v7();
        let now = format_datetime(OffsetDateTime::now_utc())?;
        let start_date = format_datetime(contest.start_date)?;
        let end_date = format_datetime(contest.end_date)?;
        let prizes = contest.prize_distribution;

        let created = insert_with_unique_code(
            self.codes.as_ref(),
            CodeKind::Contest,
            Some(&contest.name),
            "contests.contest_code",
            |code| {
                let db = self.db_connection.clone();
                let contest = contest.clone();
                let (now, start_date, end_date) = (now.clone(), start_date.clone(), end_date.clone());
                async move {
                    db.execute_write(move |pool| async move {
                        sqlx::query_as::<_, Contest>(&format!(
                            "INSERT INTO contests (
                                id, contest_code, name, description, min_number, max_number,
                                numbers_per_participation, start_date, end_date, status,
                                participation_value, first_place_pct, second_place_pct,
                                lowest_place_pct, admin_fee_pct, created_at, updated_at
                            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                            RETURNING {}",
                            CONTEST_COLUMNS
                        ))
                        .bind(id.to_string())
                        .bind(code)
                        .bind(contest.name.trim())
                        .bind(contest.description)
                        .bind(contest.min_number)
                        .bind(contest.max_number)
                        .bind(contest.numbers_per_participation)
                        .bind(start_date)
                        .bind(end_date)
                        .bind(ContestStatus::Draft.as_str())
                        .bind(participation_value.map(|v| v.to_string()))
                        .bind(prizes.first_place_pct.to_string())
                        .bind(prizes.second_place_pct.to_string())
                        .bind(prizes.lowest_place_pct.to_string())
                        .bind(prizes.admin_fee_pct.to_string())
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
            "created contest {} ({}) as {}",
            created.id, created.contest_code, created.status
        );
        Ok(created)
    }

    pub async fn get_contest(&self, contest_id: Uuid) -> Result<Contest, Error> {
        let contest = sqlx::query_as::<_, Contest>(&format!(
            "SELECT {} FROM contests WHERE id = ?",
            CONTEST_COLUMNS
        ))
        .bind(contest_id.to_string())
        .fetch_optional(self.db_connection.read())
        .await?;

        contest.ok_or_else(|| Error::NotFound(format!("contest {} not found", contest_id)))
    }

    pub async fn update_contest(
        &self,
        contest_id: Uuid,
        update: ContestUpdate,
    ) -> Result<Contest, Error> {
        let current = self.get_contest(contest_id).await?;
        let next = update.apply_to(&current)?;
        let now = format_datetime(OffsetDateTime::now_utc())?;
        let start_date = format_datetime(next.start_date)?;
        let end_date = format_datetime(next.end_date)?;
        let expected_status = current.status.as_str();

        // Guarded on the status we validated the transition from
        let updated = self
            .db_connection
            .execute_write(move |pool| async move {
                sqlx::query_as::<_, Contest>(&format!(
                    "UPDATE contests
                     SET status = ?, start_date = ?, end_date = ?, participation_value = ?,
                         first_place_pct = ?, second_place_pct = ?, lowest_place_pct = ?,
                         admin_fee_pct = ?, updated_at = ?
                     WHERE id = ? AND status = ?
                     RETURNING {}",
                    CONTEST_COLUMNS
                ))
                .bind(next.status.as_str())
                .bind(start_date)
                .bind(end_date)
                .bind(next.participation_value.map(|v| v.to_string()))
                .bind(next.prize_distribution.first_place_pct.to_string())
                .bind(next.prize_distribution.second_place_pct.to_string())
                .bind(next.prize_distribution.lowest_place_pct.to_string())
                .bind(next.prize_distribution.admin_fee_pct.to_string())
                .bind(now)
                .bind(contest_id.to_string())
                .bind(expected_status)
                .fetch_optional(&pool)
                .await
            })
            .await?;

        let updated = updated.ok_or_else(|| {
            Error::InvalidState(format!(
                "contest {} changed status while being updated",
                contest_id
            ))
        })?;

        if updated.status != current.status {
            info!(
                "contest {} moved from {} to {}",
                contest_id, current.status, updated.status
            );
        }
        Ok(updated)
    }

    /// Store the drawn numbers. Status is left to the admin, admission checks
    /// the draw itself.
    pub async fn record_draw(&self, contest_id: Uuid, draw: AddDraw) -> Result<Draw, Error> {
        let contest = self.get_contest(contest_id).await?;
        if !matches!(
            contest.status,
            ContestStatus::Active | ContestStatus::Finished
        ) {
            return Err(Error::InvalidState(format!(
                "cannot draw a {} contest",
                contest.status
            )));
        }
        if draw.drawn_numbers.is_empty() {
            return Err(Error::BadRequest(String::from("drawn_numbers is empty")));
        }
        validate_numbers(
            &draw.drawn_numbers,
            &NumberRules {
                numbers_per_participation: draw.drawn_numbers.len() as i64,
                ..contest.number_rules()
            },
        )?;

        let id = Uuid::now_v7();
        let now = OffsetDateTime::now_utc();
        let draw_date = format_datetime(draw.draw_date.unwrap_or(now))?;
        let created_at = format_datetime(now)?;
        let drawn_numbers = serde_json::to_string(&draw.drawn_numbers)?;

        let recorded = self
            .db_connection
            .execute_write(move |pool| async move {
                sqlx::query_as::<_, Draw>(
                    "INSERT INTO draws (id, contest_id, drawn_numbers, draw_date, created_at)
                     VALUES (?, ?, ?, ?, ?)
                     RETURNING id, contest_id, drawn_numbers, draw_date, created_at",
                )
                .bind(id.to_string())
                .bind(contest_id.to_string())
                .bind(drawn_numbers)
                .bind(draw_date)
                .bind(created_at)
                .fetch_one(&pool)
                .await
            })
            .await?;

        info!(
            "recorded draw {} for contest {}: {:?}",
            recorded.id, contest_id, recorded.drawn_numbers
        );
        Ok(recorded)
    }

    pub async fn has_draw(&self, contest_id: Uuid) -> Result<bool, Error> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM draws WHERE contest_id = ?)")
                .bind(contest_id.to_string())
                .fetch_one(self.db_connection.read())
                .await?;
        Ok(exists)
    }
}
