//! Inbound push notifications

pub mod dispatcher;
pub mod signature;
