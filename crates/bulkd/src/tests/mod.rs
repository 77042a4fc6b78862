//! Crate-level behaviour tests and shared test doubles.

mod scenarios;
pub(crate) mod support;
