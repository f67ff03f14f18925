//! Capability contracts for the webpilot agent kernel.
//!
//! The kernel consumes exactly two external capabilities: a [`PageDriver`]
//! (one open browser page) and a [`ModelClient`] (a local language model
//! with text and vision modes). Both are injected top-down; internal
//! components never depend on concrete driver or model types.
//!
//! This crate also carries the wire types shared across the boundary
//! (accessibility nodes, element descriptors, console/network taps), the
//! typed event vocabulary consumed by the optional valence module, and a
//! scripted [`MockPageDriver`] used throughout the kernel's tests.

pub mod driver;
pub mod error;
pub mod events;
pub mod mock;
pub mod model;

pub use driver::{
    AxNode, BoundingBox, ConsoleEvent, ConsoleLevel, ElementInfo, LoadState, NetworkEvent,
    PageDriver,
};
pub use error::{ExternalError, ExternalResult};
pub use events::AgentEvent;
pub use mock::{MockObstruction, MockPage, MockPageDriver};
pub use model::{CompletionOutcome, ModelClient, ToolSpec, VisionOptions};
