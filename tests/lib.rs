//! Shared fixtures for the flex integration tests.

pub mod fixtures;
