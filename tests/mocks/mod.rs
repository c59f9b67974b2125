//! Test doubles for the backend capability

pub mod fake_backend;

#[allow(unused_imports)]
pub use fake_backend::{default_metadata, Call, FakeBackend, Step};
