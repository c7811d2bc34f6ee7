use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::shutdown;
use crate::core::state::AppState;
use crate::tasks::expiry_sweep::ExpirySweep;
use crate::tasks::handoff_redrive::HandoffRedrive;

pub(crate) async fn run(state: AppState) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let mut handles = Vec::with_capacity(2);

    let sweep_settings = state.settings().sweep();
    if sweep_settings.enabled {
        handles.push(tokio::spawn(expiry_sweep_loop(
            state.sweep().clone(),
            sweep_settings.interval(),
            shutdown_rx.clone(),
        )));
    } else {
        tracing::warn!("SWEEP_ENABLED is off; expired sessions will not be finalized by this worker");
    }

    if let Some(after) = state.settings().handoff().redrive_after_seconds {
        let redrive = HandoffRedrive::new(state.lifecycle().clone(), state.handoff().clone(), after);
        handles.push(tokio::spawn(redrive_loop(
            redrive,
            sweep_settings.interval(),
            shutdown_rx.clone(),
        )));
    }

    shutdown::shutdown_signal().await;
    shutdown::trigger(&shutdown_tx);

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

async fn expiry_sweep_loop(
    sweep: ExpirySweep,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                sweep.run().await;
            }
        }
    }
}

async fn redrive_loop(
    redrive: HandoffRedrive,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                redrive.run().await;
            }
        }
    }
}
