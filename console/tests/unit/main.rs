//! Integration tests

mod common;
mod test_fsm;
mod test_pipeline;
mod test_webhook;
