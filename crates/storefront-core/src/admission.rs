use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::ContestStatus;

/// Why a contest refused a new participation. The display strings are shown
/// to end users as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionReason {
    #[error("contest finished")]
    ContestFinished,
    #[error("contest not active")]
    ContestNotActive,
    #[error("not started yet")]
    NotStarted,
    #[error("participation window closed")]
    WindowClosed,
    #[error("draw already performed")]
    DrawPerformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admit;

/// The parts of a contest that decide admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionWindow {
    pub status: ContestStatus,
    pub start_date: OffsetDateTime,
    pub end_date: OffsetDateTime,
}

/// Ordered admission table, first match wins. A recorded draw blocks entries
/// even if the status was never moved off `active`.
pub fn can_accept(
    window: &AdmissionWindow,
    has_existing_draw: bool,
    now: OffsetDateTime,
) -> Result<Admit, AdmissionReason> {
    if window.status == ContestStatus::Finished {
        return Err(AdmissionReason::ContestFinished);
    }
    if window.status != ContestStatus::Active {
        return Err(AdmissionReason::ContestNotActive);
    }
    if now < window.start_date {
        return Err(AdmissionReason::NotStarted);
    }
    if now > window.end_date {
        return Err(AdmissionReason::WindowClosed);
    }
    if has_existing_draw {
        return Err(AdmissionReason::DrawPerformed);
    }
    Ok(Admit)
}
