use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment,
    parse_handoff_mode, parse_positive_f64, parse_store_backend, parse_sweep_mode, parse_u16,
    parse_u32, parse_u64,
};
use super::types::{
    ApiSettings, ConfigError, CorsSettings, DatabaseSettings, HandoffMode, HandoffSettings,
    InternalSettings, RedisSettings, ResilienceSettings, RuntimeSettings, ServerHost, ServerPort,
    ServerSettings, Settings, StoreBackend, StoreSettings, SweepSettings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("TIMED_SESSIONS_HOST", "0.0.0.0");
        let port = env_or_default("TIMED_SESSIONS_PORT", "8000");

        let environment = parse_environment(
            env_optional("TIMED_SESSIONS_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("TIMED_SESSIONS_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Timed Sessions API");
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "timed_sessions");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "timed_sessions");
        let database_url = env_optional("DATABASE_URL");
        let max_connections = parse_u32(
            "DATABASE_MAX_CONNECTIONS",
            env_or_default("DATABASE_MAX_CONNECTIONS", "20"),
        )?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let backend = parse_store_backend(env_optional("STORE_BACKEND"))?;
        let cost_high_water_mark = parse_positive_f64(
            "STORE_COST_HIGH_WATER_MARK",
            env_or_default("STORE_COST_HIGH_WATER_MARK", "50"),
        )?;
        let cross_partition_cap = parse_u32(
            "STORE_CROSS_PARTITION_CAP",
            env_or_default("STORE_CROSS_PARTITION_CAP", "500"),
        )?;

        let max_attempts = parse_u32(
            "STORE_RETRY_MAX_ATTEMPTS",
            env_or_default("STORE_RETRY_MAX_ATTEMPTS", "3"),
        )?;
        let base_delay_ms = parse_u64(
            "STORE_RETRY_BASE_DELAY_MS",
            env_or_default("STORE_RETRY_BASE_DELAY_MS", "100"),
        )?;
        let max_delay_ms = parse_u64(
            "STORE_RETRY_MAX_DELAY_MS",
            env_or_default("STORE_RETRY_MAX_DELAY_MS", "5000"),
        )?;
        let jitter =
            env_optional("STORE_RETRY_JITTER").map(|value| parse_bool(&value)).unwrap_or(true);

        let sweep_enabled =
            env_optional("SWEEP_ENABLED").map(|value| parse_bool(&value)).unwrap_or(true);
        let sweep_interval_seconds = parse_u64(
            "SWEEP_INTERVAL_SECONDS",
            env_or_default("SWEEP_INTERVAL_SECONDS", "300"),
        )?;
        let sweep_batch_size =
            parse_u32("SWEEP_BATCH_SIZE", env_or_default("SWEEP_BATCH_SIZE", "100"))?;
        let sweep_execution_budget_seconds = parse_u64(
            "SWEEP_EXECUTION_BUDGET_SECONDS",
            env_or_default("SWEEP_EXECUTION_BUDGET_SECONDS", "240"),
        )?;
        let sweep_partition_concurrency = parse_u32(
            "SWEEP_PARTITION_CONCURRENCY",
            env_or_default("SWEEP_PARTITION_CONCURRENCY", "4"),
        )? as usize;
        let sweep_mode = parse_sweep_mode(env_optional("SWEEP_MODE"))?;

        let handoff_mode = parse_handoff_mode(env_optional("HANDOFF_MODE"))?;
        let scorer_url = env_or_default("SCORER_URL", "");
        let scorer_api_token = env_or_default("SCORER_API_TOKEN", "");
        let scorer_timeout_seconds = parse_u64(
            "SCORER_TIMEOUT_SECONDS",
            env_or_default("SCORER_TIMEOUT_SECONDS", "10"),
        )?;
        let redis_queue = env_or_default("HANDOFF_REDIS_QUEUE", "evaluation:triggers");
        let redrive_after_seconds = env_optional("HANDOFF_REDRIVE_AFTER_SECONDS")
            .map(|value| parse_u64("HANDOFF_REDRIVE_AFTER_SECONDS", value))
            .transpose()?;

        let internal_api_token = env_optional("INTERNAL_API_TOKEN");

        let log_level = env_or_default("TIMED_SESSIONS_LOG_LEVEL", "info");
        let json =
            env_optional("TIMED_SESSIONS_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            store: StoreSettings { backend, cost_high_water_mark, cross_partition_cap },
            resilience: ResilienceSettings { max_attempts, base_delay_ms, max_delay_ms, jitter },
            sweep: SweepSettings {
                enabled: sweep_enabled,
                interval_seconds: sweep_interval_seconds,
                batch_size: sweep_batch_size,
                execution_budget_seconds: sweep_execution_budget_seconds,
                partition_concurrency: sweep_partition_concurrency,
                mode: sweep_mode,
            },
            handoff: HandoffSettings {
                mode: handoff_mode,
                scorer_url,
                scorer_api_token,
                scorer_timeout_seconds,
                redis_queue,
                redrive_after_seconds,
            },
            internal: InternalSettings { api_token: internal_api_token },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn store(&self) -> &StoreSettings {
        &self.store
    }

    pub(crate) fn resilience(&self) -> &ResilienceSettings {
        &self.resilience
    }

    pub(crate) fn sweep(&self) -> &SweepSettings {
        &self.sweep
    }

    pub(crate) fn handoff(&self) -> &HandoffSettings {
        &self.handoff
    }

    pub(crate) fn internal(&self) -> &InternalSettings {
        &self.internal
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.resilience.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "STORE_RETRY_MAX_ATTEMPTS",
                value: String::from("0"),
            });
        }
        if self.resilience.max_delay_ms < self.resilience.base_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "STORE_RETRY_MAX_DELAY_MS",
                value: self.resilience.max_delay_ms.to_string(),
            });
        }
        if self.store.cross_partition_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "STORE_CROSS_PARTITION_CAP",
                value: String::from("0"),
            });
        }
        if self.sweep.interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "SWEEP_INTERVAL_SECONDS",
                value: String::from("0"),
            });
        }
        if self.sweep.batch_size == 0 || self.sweep.batch_size > self.store.cross_partition_cap {
            return Err(ConfigError::InvalidValue {
                field: "SWEEP_BATCH_SIZE",
                value: self.sweep.batch_size.to_string(),
            });
        }
        if self.sweep.partition_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "SWEEP_PARTITION_CONCURRENCY",
                value: String::from("0"),
            });
        }
        if self.handoff.mode == HandoffMode::Http && self.handoff.scorer_url.is_empty() {
            return Err(ConfigError::MissingSecret("SCORER_URL"));
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.store.backend == StoreBackend::Postgres
            && self.database.database_url.is_none()
            && self.database.postgres_password.is_empty()
        {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        if self.handoff.mode == HandoffMode::Http && self.handoff.scorer_api_token.is_empty() {
            return Err(ConfigError::MissingSecret("SCORER_API_TOKEN"));
        }

        if self.internal.api_token.is_none() {
            return Err(ConfigError::MissingSecret("INTERNAL_API_TOKEN"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::{HandoffMode, StoreBackend, SweepMode};
    use super::Settings;
    use crate::test_support;

    #[tokio::test]
    async fn load_applies_defaults() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.store().backend, StoreBackend::Memory);
        assert_eq!(settings.resilience().max_attempts, 3);
        assert_eq!(settings.sweep().interval_seconds, 300);
        assert_eq!(settings.sweep().mode, SweepMode::Partitioned);
        assert_eq!(settings.handoff().mode, HandoffMode::Disabled);
        assert!(settings.handoff().redrive_after_seconds.is_none());
    }

    #[tokio::test]
    async fn http_handoff_requires_scorer_url() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("HANDOFF_MODE", "http");

        let result = Settings::load();
        std::env::remove_var("HANDOFF_MODE");

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn batch_size_cannot_exceed_cross_partition_cap() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("SWEEP_BATCH_SIZE", "1000");
        std::env::set_var("STORE_CROSS_PARTITION_CAP", "100");

        let result = Settings::load();
        std::env::remove_var("SWEEP_BATCH_SIZE");
        std::env::remove_var("STORE_CROSS_PARTITION_CAP");

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn strict_mode_requires_internal_token() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("TIMED_SESSIONS_STRICT_CONFIG", "1");

        let result = Settings::load();
        std::env::set_var("TIMED_SESSIONS_STRICT_CONFIG", "0");

        assert!(result.is_err());
    }
}
