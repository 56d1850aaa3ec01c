//! Document store: corpus files and resume state.

mod corpus;

pub use corpus::*;
