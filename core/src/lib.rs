pub mod accumulation;
pub mod comparator;
pub mod config;
pub mod determinism;
pub mod report;
pub mod strategies;

pub mod error;
