//! Core types for courier.

mod endpoint;
mod event;
mod job;
mod log;

pub use endpoint::*;
pub use event::*;
pub use job::*;
pub use log::*;
