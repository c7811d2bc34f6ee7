use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use crate::core::config::{HandoffMode, Settings, StoreBackend};
use crate::core::redis::RedisHandle;
use crate::core::time::{shared_system_clock, Clock};
use crate::resilience::{ResilientStore, RetryPolicy, StoreMetrics};
use crate::services::evaluation_handoff::EvaluationHandoff;
use crate::services::session_lifecycle::SessionLifecycle;
use crate::store::memory::InMemoryStore;
use crate::store::postgres::PgDocumentStore;
use crate::store::DocumentStore;
use crate::tasks::expiry_sweep::{ExpirySweep, SweepOptions};

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: ResilientStore,
    lifecycle: SessionLifecycle,
    handoff: EvaluationHandoff,
    sweep: ExpirySweep,
    redis: Option<RedisHandle>,
    db: Option<PgPool>,
}

impl AppState {
    /// Opens the configured backend and handoff transport.
    pub(crate) async fn connect(settings: Settings) -> anyhow::Result<Self> {
        let (store, db): (Arc<dyn DocumentStore>, Option<PgPool>) = match settings.store().backend {
            StoreBackend::Postgres => {
                let pool = crate::db::init_pool(&settings)
                    .await
                    .context("Failed to open Postgres pool")?;
                crate::db::run_migrations(&pool).await.context("Failed to run migrations")?;
                (Arc::new(PgDocumentStore::new(pool.clone())), Some(pool))
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store; sessions are lost on restart");
                (Arc::new(InMemoryStore::new()), None)
            }
        };

        let redis = if settings.handoff().mode == HandoffMode::Redis {
            let redis = RedisHandle::new(settings.redis().redis_url());
            if let Err(err) = redis.connect().await {
                tracing::error!(error = %err, "Failed to connect to Redis; handoffs will fail until it is reachable");
            } else {
                tracing::info!("Redis connected successfully");
            }
            Some(redis)
        } else {
            None
        };

        let handoff_settings = settings.handoff().clone();
        Self::assemble(settings, store, shared_system_clock(), redis.clone(), db, |lifecycle| {
            EvaluationHandoff::from_settings(&handoff_settings, redis, lifecycle)
        })
    }

    pub(crate) fn assemble(
        settings: Settings,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        redis: Option<RedisHandle>,
        db: Option<PgPool>,
        build_handoff: impl FnOnce(SessionLifecycle) -> anyhow::Result<EvaluationHandoff>,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(StoreMetrics::new(
            store.backend(),
            settings.store().cost_high_water_mark,
        ));
        let access = ResilientStore::new(
            store,
            RetryPolicy::from_settings(settings.resilience()),
            metrics,
            settings.store().cross_partition_cap,
        );
        let lifecycle = SessionLifecycle::new(access.clone(), clock);
        let handoff = build_handoff(lifecycle.clone()).context("Failed to configure evaluation handoff")?;
        let sweep = ExpirySweep::new(
            lifecycle.clone(),
            handoff.clone(),
            SweepOptions::from_settings(settings.sweep()),
        );

        Ok(Self {
            inner: Arc::new(InnerState {
                settings,
                store: access,
                lifecycle,
                handoff,
                sweep,
                redis,
                db,
            }),
        })
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &ResilientStore {
        &self.inner.store
    }

    pub(crate) fn lifecycle(&self) -> &SessionLifecycle {
        &self.inner.lifecycle
    }

    pub(crate) fn handoff(&self) -> &EvaluationHandoff {
        &self.inner.handoff
    }

    pub(crate) fn sweep(&self) -> &ExpirySweep {
        &self.inner.sweep
    }

    pub(crate) fn redis(&self) -> Option<&RedisHandle> {
        self.inner.redis.as_ref()
    }

    pub(crate) fn db(&self) -> Option<&PgPool> {
        self.inner.db.as_ref()
    }

    pub(crate) async fn close(&self) {
        if let Some(redis) = self.redis() {
            redis.disconnect().await;
            tracing::info!("Redis disconnected");
        }
        if let Some(db) = self.db() {
            db.close().await;
        }
    }
}
