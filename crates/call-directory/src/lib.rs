//! # CallRelay directory
//!
//! Client side of the Call Directory: the service that creates call records,
//! assigns room identifiers, and stores join and duration reports.
//!
//! [`HttpCallDirectory`] talks to the REST service; [`InMemoryCallDirectory`]
//! keeps everything in process for local runs and tests.

pub mod directory;
pub mod error;
pub mod http;
pub mod memory;
pub mod types;

pub use directory::CallDirectory;
pub use error::{DirectoryError, DirectoryResult};
pub use http::HttpCallDirectory;
pub use memory::InMemoryCallDirectory;
pub use types::{CallRecord, CallStatus, UserProfile};
