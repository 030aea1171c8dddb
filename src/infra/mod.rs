//! Infrastructure layer
//!
//! Handles all I/O operations: the filesystem, worker connections and
//! external processes. This module is the only place where side effects
//! occur.

pub mod filesystem;
pub mod git;
pub mod logs;
pub mod package_tool;
pub mod repository;
pub mod ssh;
pub mod transport;
