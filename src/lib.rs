pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod resilience;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod store;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use crate::core::{config::Settings, state::AppState, telemetry};

async fn bootstrap() -> anyhow::Result<AppState> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    tracing::info!(
        environment = %settings.runtime().environment.as_str(),
        store_backend = settings.store().backend.as_str(),
        sweep_mode = settings.sweep().mode.as_str(),
        handoff_mode = settings.handoff().mode.as_str(),
        "Configuration loaded"
    );

    AppState::connect(settings).await
}

pub async fn run() -> anyhow::Result<()> {
    let state = bootstrap().await?;

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        "Timed sessions API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    state.close().await;
    result?;

    Ok(())
}

pub async fn run_worker() -> anyhow::Result<()> {
    let state = bootstrap().await?;

    tracing::info!(
        interval_seconds = state.settings().sweep().interval_seconds,
        batch_size = state.settings().sweep().batch_size,
        redrive = state.settings().handoff().redrive_after_seconds.is_some(),
        "Timed sessions worker started"
    );

    let result = tasks::scheduler::run(state.clone()).await;

    state.close().await;
    result?;

    Ok(())
}
