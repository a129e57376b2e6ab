//! Error types and taxonomy for the resilience subsystem.

mod error;

pub use error::{CallError, CallResult, ErrorKind, OperationError, OperationResult};
