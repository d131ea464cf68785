pub mod client;
pub mod error;
pub mod http;
pub mod in_memory;
pub mod types;

pub use client::RemoteClient;
pub use error::{ErrorClass, RemoteError};
pub use http::HttpRemoteClient;
pub use in_memory::{Fault, InMemoryRemote};
pub use types::{BatchItemResponse, Expand, WriteRequest};
