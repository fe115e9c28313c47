//! Request handlers.

pub mod health;
pub mod projects;

pub use health::*;
pub use projects::*;
