pub mod app;
pub mod batch;
pub mod cache;
pub mod cli;
pub mod client;
pub mod error;
pub mod models;
pub mod platform;
pub mod storage;

pub use error::{Error, Result};
