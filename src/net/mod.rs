//! Network-facing pieces: the backend client and the connectivity signal.

mod client;
mod connectivity;

pub use client::ApiClient;
pub use connectivity::{spawn_prober, Connectivity};
