//! Shared utilities
//!
//! Deterministic random number generation and finite-difference gradient
//! checking used by layer initialisation and by the test suites.

pub mod gradcheck;
pub mod rng;

pub use gradcheck::{numerical_gradient, relative_error};
pub use rng::SimpleRng;
