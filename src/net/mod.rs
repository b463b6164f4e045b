//! Requests, responses and the network the agent falls back to.

mod client;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{Destination, Method, Request, RequestKey, Response, ResponseType};
