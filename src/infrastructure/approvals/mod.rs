//! Approval sources.

pub mod fs_source;

pub use fs_source::FsApprovalSource;
