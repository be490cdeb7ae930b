//! `transport` crate: the remote query boundary.
//!
//! Every query service the pipeline talks to must implement [`QueryTransport`].
//! The pipeline only ever sends a named operation plus a set of named
//! variables and expects either a result payload or a [`TransportError`].

pub mod error;
pub mod traits;
pub mod http;
pub mod mock;

pub use error::TransportError;
pub use traits::{query_with_timeout, QueryRequest, QueryTransport};
pub use http::HttpTransport;
