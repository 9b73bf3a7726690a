pub mod supervisor;
pub mod worker;

pub use supervisor::{Supervisor, SupervisorHandle};
pub use worker::{ProbeReport, Worker, WorkerState};
