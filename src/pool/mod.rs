//! Pool module - retrying classification, majority voting and the worker pool.

mod consistency;
mod retry;
mod worker;

pub use consistency::*;
pub use retry::*;
pub use worker::*;
