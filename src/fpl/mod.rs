pub mod cache;
pub mod client;
pub mod models;

pub use cache::UpstreamCache;
pub use client::{FplApi, FplClient};
