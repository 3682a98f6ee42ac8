//! webpilotx library
//!
//! Core modules of the webpilotx deployment console.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
pub mod webhook;
pub mod workers;
