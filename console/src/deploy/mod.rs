//! Deployment module

pub mod env;
pub mod fsm;
pub mod git;
pub mod log;
pub mod pipeline;
pub mod process;
pub mod recipe;
pub mod systemd;
pub mod tracker;
