pub mod client;
pub mod endpoint;
pub mod error;
pub mod types;

pub use client::{ApiClient, FileUpload, Params};
pub use endpoint::Endpoint;
pub use error::{RemoteError, RemoteErrorKind};
