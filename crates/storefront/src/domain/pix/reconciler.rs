use log::{debug, error, info, warn};
use std::{sync::Arc, time::Duration};
use time::{Date, OffsetDateTime};
use tokio_util::sync::CancellationToken;

use super::{classify, PixCharge, PixError, PixQrCode, PollStep, QrPollSchedule, Sleeper};
use crate::infra::pix_gateway::{ChargeCreated, ChargeRequest, PixGateway};

/// Creates PIX charges and waits out the gateway's asynchronous QR generation
#[derive(Clone)]
pub struct PixReconciler {
    gateway: Arc<dyn PixGateway>,
    sleeper: Arc<dyn Sleeper>,
    poll_delays: Vec<Duration>,
    due_in_days: i64,
}

impl PixReconciler {
    pub fn new(
        gateway: Arc<dyn PixGateway>,
        sleeper: Arc<dyn Sleeper>,
        poll_delays: Vec<Duration>,
        due_in_days: i64,
    ) -> Self {
        Self {
            gateway,
            sleeper,
            poll_delays,
            due_in_days,
        }
    }

    pub fn due_date(&self, now: OffsetDateTime) -> Date {
        (now + time::Duration::days(self.due_in_days)).date()
    }

    /// Single attempt. The gateway does not dedupe charges, so a failure here is final.
    pub async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeCreated, PixError> {
        match self.gateway.create_charge(request).await {
            Ok(created) => {
                info!(
                    "created pix charge {} for {} ({})",
                    created.id, request.external_reference, request.amount
                );
                Ok(created)
            }
            Err(e) => {
                error!(
                    "failed to create pix charge for {}: {}",
                    request.external_reference, e
                );
                Err(PixError::ChargeFailed(e))
            }
        }
    }

    /// Polls for the charge's QR code on the configured schedule
    pub async fn resolve_qr_code(
        &self,
        external_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PixQrCode, PixError> {
        let mut schedule = QrPollSchedule::new(self.poll_delays.clone());
        let mut last_error = None;

        while let Some(delay) = schedule.next_delay() {
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {},
                    _ = self.sleeper.sleep(delay) => {},
                }
            }
            if cancel.is_cancelled() {
                warn!(
                    "qr lookup for charge {} cancelled before attempt {}",
                    external_id,
                    schedule.attempt_count()
                );
                return Err(PixError::Cancelled {
                    external_id: external_id.to_string(),
                    attempts: schedule.attempt_count() - 1,
                });
            }

            let attempt = schedule.attempt_count();
            match classify(self.gateway.fetch_qr_code(external_id).await) {
                PollStep::Ready(qr_code) => {
                    debug!("qr code for charge {} ready on attempt {}", external_id, attempt);
                    return Ok(qr_code);
                }
                PollStep::Abort(source) => {
                    error!(
                        "gateway rejected qr lookup for charge {} on attempt {}: {}",
                        external_id, attempt, source
                    );
                    return Err(PixError::QrRejected {
                        external_id: external_id.to_string(),
                        source,
                    });
                }
                PollStep::Retry(reason) => {
                    warn!(
                        "qr code for charge {} not ready on attempt {}/{}: {}",
                        external_id,
                        attempt,
                        schedule.max_attempts(),
                        reason
                    );
                    last_error = Some(reason);
                }
            }
        }

        error!(
            "qr code for charge {} unavailable after {} attempts",
            external_id,
            schedule.attempt_count()
        );
        Err(PixError::QrCodeUnavailable {
            external_id: external_id.to_string(),
            attempts: schedule.attempt_count(),
            last_error,
        })
    }

    pub async fn charge_and_issue_qr(
        &self,
        request: &ChargeRequest,
        cancel: &CancellationToken,
    ) -> Result<PixCharge, PixError> {
        let created = self.create_charge(request).await?;
        let qr_code = self.resolve_qr_code(&created.id, cancel).await?;
        Ok(PixCharge {
            external_id: created.id,
            qr_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::pix::default_qr_poll_delays,
        infra::pix_gateway::{GatewayError, QrCodeResponse},
    };
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };
    use time::macros::{date, datetime};

    /// Plays back one scripted QR response per call
    struct ScriptedGateway {
        charge: Mutex<Option<Result<ChargeCreated, GatewayError>>>,
        qr_responses: Mutex<VecDeque<Result<QrCodeResponse, GatewayError>>>,
        qr_calls: AtomicUsize,
    }

    impl ScriptedGateway {
        fn new(qr_responses: Vec<Result<QrCodeResponse, GatewayError>>) -> Self {
            Self {
                charge: Mutex::new(Some(Ok(ChargeCreated {
                    id: String::from("pay_123"),
                    status: String::from("PENDING"),
                    due_date: Some(String::from("2024-06-02")),
                }))),
                qr_responses: Mutex::new(qr_responses.into()),
                qr_calls: AtomicUsize::new(0),
            }
        }

        fn failing_charge(error: GatewayError) -> Self {
            let gateway = Self::new(vec![]);
            *gateway.charge.lock().unwrap() = Some(Err(error));
            gateway
        }

        fn qr_calls(&self) -> usize {
            self.qr_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl PixGateway for ScriptedGateway {
        async fn create_charge(
            &self,
            _request: &ChargeRequest,
        ) -> Result<ChargeCreated, GatewayError> {
            self.charge
                .lock()
                .unwrap()
                .take()
                .expect("create_charge called more than once")
        }

        async fn fetch_qr_code(&self, _external_id: &str) -> Result<QrCodeResponse, GatewayError> {
            self.qr_calls.fetch_add(1, Ordering::SeqCst);
            self.qr_responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(QrCodeResponse::default()))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl RecordingSleeper {
        fn slept(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            let count = {
                let mut slept = self.slept.lock().unwrap();
                slept.push(duration);
                slept.len()
            };
            if let Some((after, token)) = &self.cancel_after {
                if count >= *after {
                    token.cancel();
                }
            }
        }
    }

    fn unavailable() -> Result<QrCodeResponse, GatewayError> {
        Err(GatewayError::Unavailable {
            status: 502,
            body: String::from("bad gateway"),
        })
    }

    fn ready(payload: &str) -> Result<QrCodeResponse, GatewayError> {
        Ok(QrCodeResponse {
            encoded_image: Some(String::from("iVBORw0KGgo")),
            payload: Some(payload.to_string()),
            expiration_date: Some(String::from("2024-06-02 23:59:59")),
        })
    }

    fn request() -> ChargeRequest {
        ChargeRequest {
            customer_ref: String::from("cus_000005219613"),
            amount: "20.00".parse().unwrap(),
            due_date: date!(2024 - 06 - 02),
            description: String::from("TK-ABC123"),
            external_reference: String::from("0190a1b2"),
        }
    }

    fn reconciler(gateway: Arc<ScriptedGateway>, sleeper: Arc<RecordingSleeper>) -> PixReconciler {
        PixReconciler::new(gateway, sleeper, default_qr_poll_delays(), 1)
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            unavailable(),
            Err(GatewayError::Timeout(Duration::from_secs(15))),
            unavailable(),
            ready("00020126-fourth"),
        ]));
        let sleeper = Arc::new(RecordingSleeper::default());

        let charge = reconciler(gateway.clone(), sleeper.clone())
            .charge_and_issue_qr(&request(), &CancellationToken::new())
            .await
            .expect("qr code on the fourth attempt");

        assert_eq!(charge.external_id, "pay_123");
        assert_eq!(charge.qr_code.payload, "00020126-fourth");
        assert_eq!(gateway.qr_calls(), 4);
        assert_eq!(
            sleeper.slept(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test]
    async fn client_error_aborts_without_waiting() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Err(GatewayError::Rejected {
            status: 404,
            body: String::from("{\"errors\":[]}"),
        })]));
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = reconciler(gateway.clone(), sleeper.clone())
            .resolve_qr_code("pay_123", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PixError::QrRejected { .. }));
        assert_eq!(err.code(), "GATEWAY_REJECTED");
        assert_eq!(gateway.qr_calls(), 1);
        assert!(sleeper.slept().is_empty());
    }

    #[tokio::test]
    async fn exhausted_schedule_reports_qr_unavailable() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Ok(QrCodeResponse::default()),
            unavailable(),
            unavailable(),
            unavailable(),
            unavailable(),
        ]));
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = reconciler(gateway.clone(), sleeper.clone())
            .resolve_qr_code("pay_123", &CancellationToken::new())
            .await
            .unwrap_err();

        match &err {
            PixError::QrCodeUnavailable {
                external_id,
                attempts,
                last_error,
            } => {
                assert_eq!(external_id, "pay_123");
                assert_eq!(*attempts, 5);
                assert!(last_error.as_deref().unwrap_or_default().contains("502"));
            }
            other => panic!("expected QrCodeUnavailable, got {:?}", other),
        }
        assert_eq!(err.external_id(), Some("pay_123"));
        assert_eq!(gateway.qr_calls(), 5);
        assert_eq!(sleeper.slept().len(), 4);
    }

    #[tokio::test]
    async fn charge_failure_is_not_retried() {
        let gateway = Arc::new(ScriptedGateway::failing_charge(GatewayError::Unavailable {
            status: 503,
            body: String::new(),
        }));
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = reconciler(gateway.clone(), sleeper)
            .charge_and_issue_qr(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PixError::ChargeFailed(_)));
        assert_eq!(err.code(), "GATEWAY_UNAVAILABLE");
        assert_eq!(err.external_id(), None);
        assert_eq!(gateway.qr_calls(), 0);
    }

    #[tokio::test]
    async fn cancellation_stops_between_delays() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            unavailable(),
            unavailable(),
            unavailable(),
        ]));
        let token = CancellationToken::new();
        let sleeper = Arc::new(RecordingSleeper {
            slept: Mutex::new(vec![]),
            cancel_after: Some((2, token.clone())),
        });

        let err = reconciler(gateway.clone(), sleeper.clone())
            .resolve_qr_code("pay_123", &token)
            .await
            .unwrap_err();

        match err {
            PixError::Cancelled { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected Cancelled, got {:?}", other),
        }
        assert_eq!(gateway.qr_calls(), 2);
    }

    #[tokio::test]
    async fn already_cancelled_token_makes_no_calls() {
        let gateway = Arc::new(ScriptedGateway::new(vec![ready("000201")]));
        let token = CancellationToken::new();
        token.cancel();

        let err = reconciler(gateway.clone(), Arc::new(RecordingSleeper::default()))
            .resolve_qr_code("pay_123", &token)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CANCELLED");
        assert_eq!(gateway.qr_calls(), 0);
    }

    #[test]
    fn due_date_is_offset_from_now() {
        let reconciler = reconciler(
            Arc::new(ScriptedGateway::new(vec![])),
            Arc::new(RecordingSleeper::default()),
        );
        assert_eq!(
            reconciler.due_date(datetime!(2024-06-01 23:30 UTC)),
            date!(2024 - 06 - 02)
        );
    }
}
