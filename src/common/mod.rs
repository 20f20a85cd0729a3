//! Filesystem primitives shared by the session, checkpoint and config stores.

pub mod fs;
mod lock;

pub use lock::FileLock;
