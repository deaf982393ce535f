//! Remote document workspace: typed API, HTTP client, and the
//! in-memory fake used by tests.

pub mod client;
pub mod http;
pub mod memory;
pub mod types;

pub use client::{DocumentApi, RemoteError};
pub use http::HttpDocumentClient;
pub use memory::InMemoryDocumentApi;
pub use types::{Block, Document, DocumentQuery, DocumentRef, RemoteValue};
