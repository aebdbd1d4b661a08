//! Utils module - logging setup, delivery metrics and string helpers

pub mod logging;
pub mod metrics;
pub mod string;

pub use logging::init_logging;
