//! HTTP surface of the relay gateway: the OpenAI-compatible completions
//! endpoint, the models listing, and the admin control plane.
pub mod gateway_server;

pub use gateway_server::*;
