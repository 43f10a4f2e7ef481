use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::{LifecycleEngine, SweepReport};
use crate::error::AppError;

/// Periodically asks the engine to expire listings whose payment never
/// arrived. Runs alongside request traffic; the first sweep happens one full
/// interval after start.
pub struct StaleSweeper {
    engine: Arc<LifecycleEngine>,
    every: Duration,
}

impl StaleSweeper {
    pub fn new(engine: Arc<LifecycleEngine>, every: Duration) -> Self {
        Self { engine, every }
    }

    pub async fn run_once(&self) -> Result<SweepReport, AppError> {
        tracing::info!("Running cleanup for stale pending properties");
        self.engine.sweep_stale().await
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.every, self.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once().await {
                    tracing::error!("Stale property sweep failed: {err}");
                }
            }
        })
    }
}
