use rust_decimal::Decimal;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use storefront_core::{
    CodeGenerator, CodeKind, ContestStatus, PrizeDistribution, RandomCodeGenerator,
};
use time::{Duration, OffsetDateTime};

use super::{Contest, ContestStore, ContestUpdate, NewContest};
use crate::infra::db::DBConnection;

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn test_db(pool: sqlx::SqlitePool) -> DBConnection {
    DBConnection::from_pools(pool.clone(), pool)
}

pub fn contest_store(db: DBConnection) -> ContestStore {
    ContestStore::new(db, Arc::new(RandomCodeGenerator))
}

/// Always hands out the same code, to force collisions
pub struct FixedCodes(pub &'static str);

impl CodeGenerator for FixedCodes {
    fn generate(&self, _kind: CodeKind, _seed: Option<&str>) -> String {
        self.0.to_string()
    }
}

/// Hands out the given codes in order, then keeps repeating the last one
pub struct ScriptedCodes(Mutex<VecDeque<String>>);

impl ScriptedCodes {
    pub fn new(codes: &[&str]) -> Self {
        Self(Mutex::new(codes.iter().map(|c| c.to_string()).collect()))
    }
}

impl CodeGenerator for ScriptedCodes {
    fn generate(&self, _kind: CodeKind, _seed: Option<&str>) -> String {
        let mut codes = self.0.lock().unwrap();
        if codes.len() > 1 {
            codes.pop_front().unwrap()
        } else {
            codes.front().cloned().unwrap()
        }
    }
}

/// Pick 3 of 1..=25, open since yesterday until tomorrow
pub fn open_contest(name: &str, price: Option<&str>) -> NewContest {
    let now = OffsetDateTime::now_utc();
    NewContest {
        name: name.to_string(),
        description: None,
        min_number: 1,
        max_number: 25,
        numbers_per_participation: 3,
        start_date: now - Duration::days(1),
        end_date: now + Duration::days(1),
        participation_value: price.map(dec),
        prize_distribution: PrizeDistribution {
            first_place_pct: Decimal::from(65),
            second_place_pct: Decimal::from(10),
            lowest_place_pct: Decimal::from(7),
            admin_fee_pct: Decimal::from(18),
        },
    }
}

pub async fn active_contest(store: &ContestStore, name: &str, price: Option<&str>) -> Contest {
    let contest = store
        .create_contest(open_contest(name, price))
        .await
        .unwrap();
    store
        .update_contest(
            contest.id,
            ContestUpdate {
                status: Some(ContestStatus::Active),
                ..Default::default()
            },
        )
        .await
        .unwrap()
}
