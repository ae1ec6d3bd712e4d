pub mod backend;
pub mod document_index;
pub mod features;
pub mod models;
