use std::sync::{Arc, OnceLock};
use std::time::Duration as StdDuration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::config::Settings;
use crate::core::state::AppState;
use crate::core::time::{Clock, ManualClock};
use crate::db::models::{AssessmentDefinition, Submission};
use crate::db::types::SubmissionStatus;
use crate::resilience::{ResilientStore, RetryPolicy, StoreMetrics};
use crate::services::evaluation_handoff::testing::RecordingTrigger;
use crate::services::evaluation_handoff::{EvaluationHandoff, EvaluationTrigger};
use crate::services::session_lifecycle::SessionLifecycle;
use crate::store::memory::InMemoryStore;
use crate::store::Version;

pub(crate) const TEST_INTERNAL_TOKEN: &str = "test-internal-token";

const ENV_KEYS: &[&str] = &[
    "TIMED_SESSIONS_HOST",
    "TIMED_SESSIONS_PORT",
    "TIMED_SESSIONS_ENV",
    "ENVIRONMENT",
    "TIMED_SESSIONS_STRICT_CONFIG",
    "PROJECT_NAME",
    "API_V1_STR",
    "BACKEND_CORS_ORIGINS",
    "DATABASE_URL",
    "POSTGRES_PASSWORD",
    "STORE_BACKEND",
    "STORE_COST_HIGH_WATER_MARK",
    "STORE_CROSS_PARTITION_CAP",
    "STORE_RETRY_MAX_ATTEMPTS",
    "STORE_RETRY_BASE_DELAY_MS",
    "STORE_RETRY_MAX_DELAY_MS",
    "STORE_RETRY_JITTER",
    "SWEEP_ENABLED",
    "SWEEP_INTERVAL_SECONDS",
    "SWEEP_BATCH_SIZE",
    "SWEEP_EXECUTION_BUDGET_SECONDS",
    "SWEEP_PARTITION_CONCURRENCY",
    "SWEEP_MODE",
    "HANDOFF_MODE",
    "SCORER_URL",
    "SCORER_API_TOKEN",
    "SCORER_TIMEOUT_SECONDS",
    "HANDOFF_REDIS_QUEUE",
    "HANDOFF_REDRIVE_AFTER_SECONDS",
    "INTERNAL_API_TOKEN",
    "TIMED_SESSIONS_LOG_LEVEL",
    "TIMED_SESSIONS_LOG_JSON",
    "PROMETHEUS_ENABLED",
];

fn test_start() -> OffsetDateTime {
    datetime!(2025-03-01 12:00 UTC)
}

fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: StdDuration::from_millis(1),
        max_delay: StdDuration::from_millis(5),
        multiplier: 2.0,
        jitter: false,
    }
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

/// Clears every key `Settings::load` reads, then pins a test environment.
pub(crate) fn set_test_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
    std::env::set_var("TIMED_SESSIONS_ENV", "test");
    std::env::set_var("TIMED_SESSIONS_STRICT_CONFIG", "0");
    std::env::set_var("STORE_BACKEND", "memory");
    std::env::set_var("STORE_RETRY_BASE_DELAY_MS", "1");
    std::env::set_var("STORE_RETRY_MAX_DELAY_MS", "5");
    std::env::set_var("STORE_RETRY_JITTER", "0");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
}

/// Lifecycle wired over an in-memory store and a manual clock.
pub(crate) struct Harness {
    pub(crate) store: Arc<InMemoryStore>,
    pub(crate) clock: ManualClock,
    pub(crate) access: ResilientStore,
    pub(crate) lifecycle: SessionLifecycle,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_partition_cap(100)
    }

    /// Caps cross-partition scans (and partition enumeration) at `cap`.
    pub(crate) fn with_partition_cap(cap: u32) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = ManualClock::new(test_start());
        let access = ResilientStore::new(
            store.clone(),
            fast_retry_policy(),
            Arc::new(StoreMetrics::new("memory", 50.0)),
            cap,
        );
        let lifecycle = SessionLifecycle::new(access.clone(), Arc::new(clock.clone()));
        Self { store, clock, access, lifecycle }
    }

    pub(crate) fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub(crate) fn assessment(
        &self,
        id: &str,
        duration_seconds: i64,
        closes_at: Option<OffsetDateTime>,
    ) -> AssessmentDefinition {
        let assessment = AssessmentDefinition {
            id: id.to_string(),
            title: format!("Assessment {id}"),
            duration_seconds,
            closes_at,
        };
        self.store.insert_assessment(assessment.clone());
        assessment
    }

    /// Stores a submission directly in `status`. Started and completed
    /// timestamps are filled in to match the status.
    pub(crate) fn seed(
        &self,
        assessment_id: &str,
        id: &str,
        status: SubmissionStatus,
        expiration_time: Option<OffsetDateTime>,
    ) -> Submission {
        let now = self.now();
        let started_at = (status != SubmissionStatus::Scheduled).then(|| now - Duration::hours(1));
        let submitted_at = status.is_completed().then_some(now);
        self.store.insert_submission(Submission {
            id: id.to_string(),
            assessment_id: assessment_id.to_string(),
            candidate_id: format!("cand-{id}"),
            status,
            started_at,
            expiration_time,
            submitted_at,
            evaluation_ref: None,
            finalize_error: None,
            version: Version::from("seed"),
            created_at: now - Duration::hours(2),
            updated_at: now,
        })
    }

    pub(crate) fn handoff(&self, trigger: Option<Arc<RecordingTrigger>>) -> EvaluationHandoff {
        let trigger = trigger.map(|trigger| trigger as Arc<dyn EvaluationTrigger>);
        EvaluationHandoff::new(trigger, self.lifecycle.clone())
    }
}

/// Router over an in-memory state with a manual clock and a recording
/// evaluation trigger. Holds the env lock for its lifetime.
pub(crate) struct TestApp {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    pub(crate) store: Arc<InMemoryStore>,
    pub(crate) clock: ManualClock,
    pub(crate) recorder: Arc<RecordingTrigger>,
    _guard: OwnedMutexGuard<()>,
}

impl TestApp {
    pub(crate) fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }
}

pub(crate) async fn setup_test_app() -> TestApp {
    setup_test_app_with(|| {}).await
}

/// Like [`setup_test_app`], with extra environment applied before settings
/// are loaded.
pub(crate) async fn setup_test_app_with(configure: impl FnOnce()) -> TestApp {
    let guard = env_lock().await;
    set_test_env();
    configure();

    let settings = Settings::load().expect("settings");
    let store = Arc::new(InMemoryStore::new());
    let clock = ManualClock::new(test_start());
    let recorder = Arc::new(RecordingTrigger::default());

    let trigger: Arc<dyn EvaluationTrigger> = recorder.clone();
    let state = AppState::assemble(
        settings,
        store.clone(),
        Arc::new(clock.clone()),
        None,
        None,
        |lifecycle| Ok(EvaluationHandoff::new(Some(trigger), lifecycle)),
    )
    .expect("state");
    let app = api::router::router(state.clone());

    TestApp { state, app, store, clock, recorder, _guard: guard }
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    internal_token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = internal_token {
        builder = builder.header("x-internal-token", token);
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
