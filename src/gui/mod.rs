pub mod application;
pub mod graph;
pub mod history;
pub mod types;
