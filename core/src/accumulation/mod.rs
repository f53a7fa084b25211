pub mod bridge;
pub mod engine;
pub mod file_store;
pub mod model;
pub mod store;
