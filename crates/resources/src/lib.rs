//! Upload façade over the transfer engine.
//!
//! [`ResourceManager`] owns the session registry and exposes the
//! operations request layers wrap: begin, submit, fetch, abandon, plus
//! one-shot uploads and maintenance helpers.

mod config;
mod manager;

pub use config::ResourceConfig;
pub use manager::{ResourceManager, chunk_error_response};
