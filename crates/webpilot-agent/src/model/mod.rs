//! Model client adapters.
//!
//! The kernel consumes the opaque `ModelClient` trait; this module ships
//! the OpenAI-compatible HTTP adapter for local runtimes plus a scripted
//! mock for tests.

pub mod mock_client;
pub mod openai_compat;

pub use mock_client::{MockModelClient, MockModelStep};
pub use openai_compat::OpenAiCompatClient;
