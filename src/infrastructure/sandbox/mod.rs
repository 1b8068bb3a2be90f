//! Sandbox execution providers.

pub mod subprocess;

pub use subprocess::SubprocessSandbox;
