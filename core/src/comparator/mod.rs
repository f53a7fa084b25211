pub mod batch;
pub mod registry;
pub mod scoring;
pub mod template;
pub mod types;
