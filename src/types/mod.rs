mod error;
mod request;
mod summary;

pub use error::ErrorKind;
pub use request::{Handler, Request};
pub use summary::RunSummary;

/// The volley `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
