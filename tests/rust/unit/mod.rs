//! Unit tests - exercise individual components through the public API
//!
//! No database is needed; each component is checked in isolation.

mod cte_ordering_tests;
mod dialect_tests;
mod parser_robustness_tests;
mod variable_scope_tests;
