//! Data loss prevention rules, configured per mail domain.

pub use aggregate::*;
pub use rule::*;

mod aggregate;
mod rule;
