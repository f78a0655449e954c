//! Built-in provider implementations.

pub mod mock;

pub use mock::MockProvider;
