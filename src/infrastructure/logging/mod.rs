//! Tracing subscriber setup.

pub mod logger;

pub use logger::init_logging;
