use std::time::Duration;

use super::PixQrCode;
use crate::infra::pix_gateway::{GatewayError, QrCodeResponse};

/// Delays the gateway documents as enough for QR generation: ~15s in total
pub fn default_qr_poll_delays() -> Vec<Duration> {
    [0, 1, 2, 4, 8].into_iter().map(Duration::from_secs).collect()
}

/// Fixed table of waits, one per QR lookup. The table length is the attempt budget.
#[derive(Debug, Clone)]
pub struct QrPollSchedule {
    delays: Vec<Duration>,
    attempt_count: u32,
}

impl Default for QrPollSchedule {
    fn default() -> Self {
        Self::new(default_qr_poll_delays())
    }
}

impl QrPollSchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            attempt_count: 0,
        }
    }

    /// Wait before the next attempt, or `None` once the budget is spent
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.delays.get(self.attempt_count as usize).copied()?;
        self.attempt_count += 1;
        Some(delay)
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.delays.len() as u32
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts()
    }

    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }
}

/// What one lookup result means for the poll loop
#[derive(Debug)]
pub enum PollStep {
    Ready(PixQrCode),
    /// The charge is invalid, stop without spending the remaining delays
    Abort(GatewayError),
    /// Not there yet or the gateway hiccuped, try on the next slot
    Retry(String),
}

pub fn classify(result: Result<QrCodeResponse, GatewayError>) -> PollStep {
    match result {
        Ok(QrCodeResponse {
            encoded_image: Some(encoded_image),
            payload: Some(payload),
            expiration_date,
        }) if !encoded_image.is_empty() && !payload.is_empty() => PollStep::Ready(PixQrCode {
            payload,
            encoded_image,
            expiration_date,
        }),
        Ok(_) => PollStep::Retry(String::from("qr code fields missing from response")),
        Err(e @ GatewayError::Rejected { .. }) | Err(e @ GatewayError::Request(_)) => {
            PollStep::Abort(e)
        }
        Err(e) => PollStep::Retry(e.to_string()),
    }
}
