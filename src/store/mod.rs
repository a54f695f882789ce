pub mod error;
pub mod in_memory_backend;
pub mod traits;

pub use error::StoreError;
pub use in_memory_backend::InMemoryStore;
pub use traits::{Collection, DocRef, Document, DocumentSnapshot, DocumentStore, DocumentStream};
