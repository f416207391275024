//! Shared primitives for Conduit crates
//!
//! Holds the error taxonomy every layer reports against, the boundary trait
//! the request-serving layer uses to render errors, and the per-call context
//! that threads cancellation and deadlines through adapters and tool handlers.

#![allow(clippy::must_use_candidate)]

mod context;
mod error;

pub use context::RequestContext;
pub use error::{ErrorKind, HttpError};
