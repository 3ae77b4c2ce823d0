//! Storage implementations

pub mod http;
pub mod memory;
pub mod object_store;
pub mod retry;

pub use http::HttpObjectStore;
pub use memory::InMemoryObjectStore;
pub use object_store::{download_to_file, read_to_vec, ObjectStore, ObjectStream};
pub use retry::RetryPolicy;
