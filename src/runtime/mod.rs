//! Runtime subsystem modules.

pub(crate) mod context;
mod core;
mod dispatch;

pub use core::Runtime;
