use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::http_probe::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Waiting,
    Probing,
    /// Terminal.
    Stopped,
}

/// A finished probe, tagged with the worker that ran it.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub worker_id: usize,
    pub record: TimingRecord,
}

/// Probes one endpoint on a fixed cadence until told to stop.
pub struct Worker {
    id: usize,
    probe: RequestProbe,
    interval: Duration,
    state: watch::Sender<WorkerState>,
    reports: Option<mpsc::UnboundedSender<ProbeReport>>,
}

impl Worker {
    pub fn new(
        id: usize,
        probe: RequestProbe,
        interval: Duration,
        reports: Option<mpsc::UnboundedSender<ProbeReport>>,
    ) -> (Self, watch::Receiver<WorkerState>) {
        let (state, state_rx) = watch::channel(WorkerState::Waiting);
        let worker = Worker {
            id,
            probe,
            interval,
            state,
            reports,
        };
        (worker, state_rx)
    }

    /// Wait `interval`, probe, repeat.
    ///
    /// The wait counts from the end of the previous probe, so the effective
    /// period is `interval` plus the probe's own duration. `shutdown` is only
    /// observed while waiting: a probe already in flight runs to completion
    /// unless `abort` is cancelled.
    ///
    /// Reports are forwarded until the receiving side goes away; after that the
    /// worker keeps its cadence and only logs.
    pub async fn run(mut self, shutdown: CancellationToken, abort: CancellationToken) {
        loop {
            self.state.send_replace(WorkerState::Waiting);
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = sleep(self.interval) => {}
            }

            self.state.send_replace(WorkerState::Probing);
            let record = self.probe.run(&abort).await;
            let report = ProbeReport {
                worker_id: self.id,
                record,
            };
            let closed = self
                .reports
                .as_ref()
                .is_some_and(|reports| reports.send(report).is_err());
            if closed {
                log::debug!("worker {} report receiver closed, no longer forwarding", self.id);
                self.reports = None;
            }
        }

        log::info!("worker {} received completion signal", self.id);
        self.state.send_replace(WorkerState::Stopped);
    }
}
