pub mod collector;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod store;

mod domain;
pub use domain::{config, item, record};

pub mod dirs;

mod daemon;
pub use daemon::{Daemon, DaemonError, RunSummary, RuntimeConfig};
