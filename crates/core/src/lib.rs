//! Core data types shared by venue connectors and their consumers.

pub mod exchange;
pub mod market;
pub mod status;

pub use exchange::*;
pub use market::*;
pub use status::*;
