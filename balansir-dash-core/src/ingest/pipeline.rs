//! Feeds the dashboard graph from a [`MetricsApi`].
//!
//! On entry the bulk load runs once and replaces the sample history; only
//! after it finished (successfully or not) does the polling interval start.
//! Each tick spawns one poll on the current `LocalSet`. Polls are
//! independent: a slow poll does not delay the next tick, failed polls skip
//! their tick, and at most `max_in_flight` polls are pending at once.
//!
//! The logs page reloads the whole log list on the same cadence.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::client::MetricsApi;
use crate::config::DashConfig;
use crate::dashboard::Dashboard;
use crate::error::{retry_async_with_config, DashResult, RetryConfig};
use crate::models::{BulkLoad, LogRecord, Sample};
use crate::reactive::Effect;

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub poll_interval: Duration,
    pub max_in_flight: usize,
    pub bulk_retry: RetryConfig,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_in_flight: 4,
            bulk_retry: RetryConfig::for_bulk_load(3, Duration::from_millis(250)),
        }
    }
}

impl From<&DashConfig> for IngestSettings {
    fn from(config: &DashConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_in_flight: config.polling.max_in_flight.max(1),
            bulk_retry: RetryConfig::for_bulk_load(
                config.polling.bulk_load_max_attempts,
                Duration::from_millis(config.polling.bulk_load_retry_delay_ms),
            ),
        }
    }
}

pub struct Ingestion {
    dashboard: Rc<Dashboard>,
    settings: IngestSettings,
    attempts: Cell<u64>,
    pub bulk_load_fx: Effect<u64, BulkLoad>,
    pub poll_fx: Effect<(), Sample>,
    pub logs_fx: Effect<(), Vec<LogRecord>>,
}

impl Ingestion {
    pub fn new(dashboard: Rc<Dashboard>, api: Rc<dyn MetricsApi>, settings: IngestSettings) -> Self {
        let graph = dashboard.graph().clone();

        let bulk_load_fx = {
            let api = api.clone();
            let retry = settings.bulk_retry.clone();
            Effect::new(&graph, "bulk_load", move |attempt: u64| {
                let (api, retry) = (api.clone(), retry.clone());
                async move {
                    let samples =
                        retry_async_with_config(|_| api.fetch_collected_stats(), retry).await?;
                    Ok(BulkLoad { attempt, samples })
                }
            })
        };

        let poll_fx = {
            let api = api.clone();
            Effect::new(&graph, "poll", move |_: ()| {
                let api = api.clone();
                async move { api.fetch_stats().await }
            })
        };

        let logs_fx = Effect::new(&graph, "load_logs", move |_: ()| {
            let api = api.clone();
            async move { api.fetch_collected_logs().await }
        });

        graph.forward(&bulk_load_fx.done, &dashboard.samples_loaded);
        graph.forward(&poll_fx.done, &dashboard.sample_added);
        graph.forward(&logs_fx.done, &dashboard.logs_loaded);

        Self {
            dashboard,
            settings,
            attempts: Cell::new(0),
            bulk_load_fx,
            poll_fx,
            logs_fx,
        }
    }

    pub fn dashboard(&self) -> &Rc<Dashboard> {
        &self.dashboard
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    fn next_attempt(&self) -> u64 {
        let attempt = self.attempts.get() + 1;
        self.attempts.set(attempt);
        attempt
    }

    /// Replaces the sample history with the server's collected stats.
    ///
    /// When every retry fails the history is left as it was and the
    /// failure is logged once.
    pub async fn bulk_load(&self) -> DashResult<usize> {
        let attempt = self.next_attempt();
        match self
            .bulk_load_fx
            .run(self.dashboard.graph(), attempt)
            .await
        {
            Ok(load) => {
                info!(attempt, samples = load.samples.len(), "bulk load finished");
                Ok(load.samples.len())
            }
            Err(e) => {
                warn!(
                    attempt,
                    error_code = e.error_code(),
                    "bulk load gave up, keeping previous history: {}",
                    e
                );
                Err(e)
            }
        }
    }

    /// One poll. A failure only means this tick produced no sample.
    pub async fn poll_once(&self) -> DashResult<Sample> {
        self.poll_fx
            .run(self.dashboard.graph(), ())
            .await
            .inspect_err(|e| debug!(error_code = e.error_code(), "poll skipped: {}", e))
    }

    pub async fn load_logs(&self) -> DashResult<usize> {
        let records = self
            .logs_fx
            .run(self.dashboard.graph(), ())
            .await
            .inspect_err(|e| e.log())?;
        info!(records = records.len(), "logs loaded");
        Ok(records.len())
    }

    /// Loads the logs now, then reloads them every `poll_interval`, each
    /// success replacing the whole list. A failed reload skips its tick.
    ///
    /// With `ticks` set, returns after that many reloads; otherwise runs
    /// until the task is dropped.
    pub async fn follow_logs(&self, ticks: Option<u64>) {
        let _ = self.load_logs().await;

        let period = self.settings.poll_interval;
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut tick = 0u64;
        info!(interval_ms = period.as_millis() as u64, "following logs");

        while ticks.map_or(true, |limit| tick < limit) {
            timer.tick().await;
            tick += 1;

            match self.logs_fx.run(self.dashboard.graph(), ()).await {
                Ok(records) => debug!(tick, records = records.len(), "logs reloaded"),
                Err(e) => debug!(tick, error_code = e.error_code(), "log reload skipped: {}", e),
            }
        }
        debug!(ticks = tick, "stopped following logs");
    }

    /// Bulk load, then poll every `poll_interval`.
    ///
    /// With `ticks` set, returns after that many ticks once the polls they
    /// started have settled; otherwise runs until the task is dropped.
    /// Must be called from inside a `LocalSet`.
    pub async fn run(self: &Rc<Self>, ticks: Option<u64>) {
        let _ = self.bulk_load().await;

        let period = self.settings.poll_interval;
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut polls = JoinSet::new();
        let mut tick = 0u64;
        info!(interval_ms = period.as_millis() as u64, "polling started");

        while ticks.map_or(true, |limit| tick < limit) {
            timer.tick().await;
            tick += 1;

            while polls.try_join_next().is_some() {}
            if polls.len() >= self.settings.max_in_flight {
                debug!(tick, in_flight = polls.len(), "poll skipped, too many in flight");
                continue;
            }

            let this = Rc::clone(self);
            polls.spawn_local(async move {
                let _ = this.poll_once().await;
            });
        }

        while polls.join_next().await.is_some() {}
        debug!(ticks = tick, "polling stopped");
    }
}
