pub mod config;
pub mod logging;
pub mod spans;

pub use config::{Environment, env_or, env_list};
pub use logging::setup_logging;
