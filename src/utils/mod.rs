//! Shared utilities.

pub mod decimal;

pub use decimal::{from_basis_points, from_fixed, to_fixed};
