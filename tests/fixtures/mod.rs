//! Test fixtures

pub mod relay;

pub use relay::{CREDENTIAL, TestRelay};
