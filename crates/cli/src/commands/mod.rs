//! CLI command implementations

mod config;
mod parse;
mod records;
mod run;

pub use config::{cmd_config_init, cmd_config_show};
pub use parse::cmd_parse;
pub use records::cmd_records;
pub use run::cmd_run;
