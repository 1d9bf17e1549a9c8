pub mod config;
pub mod error;
pub mod import;
pub mod merge;
pub mod models;
pub mod service;
pub mod storage;
pub mod sync;
