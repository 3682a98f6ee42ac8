//! On-disk layout and settings

pub mod layout;
pub mod secret;
pub mod settings;
