//! Pipeline module - single stages and the stage cascade.

mod cascade;
mod stage;

pub use cascade::*;
pub use stage::*;
