//! Tower middleware for the HTTP stack.
//!
//! - [`http`]: transport-level layers (request id, tracing, timeout)
//! - [`context`]: authenticates each request and attaches its snapshot
//! - [`gate`]: rejects requests whose snapshot lacks the required roles

pub mod context;
pub mod gate;
pub mod http;

pub use context::{SnapshotLayer, SnapshotService};
pub use gate::{RequireRolesLayer, RequireRolesService};
pub use http::build_http_layers;
