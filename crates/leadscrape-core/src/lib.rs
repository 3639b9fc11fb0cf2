pub mod config;
pub mod extraction;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod sqlite;
