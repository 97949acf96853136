pub mod agents;
pub mod client;

pub use client::*;
