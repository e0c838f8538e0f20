pub mod directory;
pub mod document_store;
pub mod paths;

pub use document_store::{DocumentStore, StoreError, Transaction};
