//! CLI command implementations.

pub mod check;
pub mod init;
pub mod run;

pub use check::check_config;
pub use init::init_project;
pub use run::{run_toolbar, RunOptions};
