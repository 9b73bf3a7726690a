use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use super::worker::{ProbeReport, Worker, WorkerState};
use crate::clock::{Clock, SystemClock};
use crate::config::probe_config::PER_REQUEST_TIMEOUT;
use crate::config::{ClientConfig, ConfigError};
use crate::http_probe::prelude::*;
use crate::transport::TransportPool;
use crate::transport::flush::spawn_flush;

/// Builds the shared transport and launches the workers.
pub struct Supervisor {
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    reports: Option<mpsc::UnboundedSender<ProbeReport>>,
    request_timeout: std::time::Duration,
}

impl Supervisor {
    pub fn new(config: ClientConfig) -> Self {
        Supervisor {
            config,
            clock: Arc::new(SystemClock),
            reports: None,
            request_timeout: PER_REQUEST_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Forward every finished probe to `tx` in addition to logging it.
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<ProbeReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Validate the configuration, then start the flush routine and one worker
    /// per requested unit of rate. Nothing is spawned if validation fails.
    pub fn start(self) -> Result<SupervisorHandle, ConfigError> {
        let endpoint = self.config.validate()?;

        let pool = TransportPool::from_config(&self.config.transport, &self.config.dns_hosts)?;
        let probe = RequestProbe::new(pool.clone(), &endpoint, self.request_timeout, self.clock)?;

        let shutdown = CancellationToken::new();
        let abort = CancellationToken::new();

        let flusher = spawn_flush(pool.clone(), self.config.flush_interval(), shutdown.clone());

        let mut workers = JoinSet::new();
        let mut states = Vec::with_capacity(self.config.worker_count());
        for id in 1..=self.config.worker_count() {
            log::info!("starting worker {id}");
            let (worker, state) = Worker::new(
                id,
                probe.clone(),
                self.config.interval(),
                self.reports.clone(),
            );
            states.push(state);
            workers.spawn(worker.run(shutdown.clone(), abort.clone()));
        }

        Ok(SupervisorHandle {
            pool,
            shutdown,
            abort,
            workers,
            states,
            flusher: Some(flusher),
        })
    }
}

/// Running workers. Stop with [`SupervisorHandle::stop`].
pub struct SupervisorHandle {
    pool: TransportPool,
    shutdown: CancellationToken,
    abort: CancellationToken,
    workers: JoinSet<()>,
    states: Vec<watch::Receiver<WorkerState>>,
    flusher: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    pub fn worker_count(&self) -> usize {
        self.states.len()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.states.iter().map(|state| *state.borrow()).collect()
    }

    pub fn pool(&self) -> &TransportPool {
        &self.pool
    }

    /// Cancelling this aborts probes that are still in flight.
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Signal every worker to stop and wait until all of them have.
    ///
    /// Safe to call more than once, and safe to abandon midway and call again:
    /// workers already joined are not joined twice.
    pub async fn stop(&mut self) {
        if !self.shutdown.is_cancelled() {
            log::info!("calling cancel");
            self.shutdown.cancel();
            log::info!("waiting for workers to cleanup");
        }

        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                log::error!("worker task failed: {e}");
            }
        }

        if let Some(flusher) = self.flusher.as_mut() {
            if let Err(e) = flusher.await {
                log::error!("flush task failed: {e}");
            }
            self.flusher = None;
        }
    }
}
