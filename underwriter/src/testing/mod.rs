//! Test doubles and fixtures.
//!
//! Shipped as a regular module so integration tests and benches can share
//! the same mock collaborators and pre-wired harnesses.

pub mod fixtures;
mod mocks;

pub use mocks::{MockInferenceClient, MockRegistryClient, MockRetrievalClient};
