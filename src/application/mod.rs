// Application layer: use cases shared by the HTTP API, the CLI and the
// background maintenance loop.

pub mod error;
mod maintenance;
mod service;

pub use error::*;
pub use maintenance::*;
pub use service::*;
