pub mod catalog;
pub mod coordinator;
pub mod navigation;
pub mod provider;
pub mod query;
pub mod serialize;
pub mod types;
