//! Integration tests - compile complete expressions and inspect the SQL
//!
//! These drive `FhirPathCompiler` end to end for both dialects.

mod compiler_api_tests;
mod scenario_tests;
mod translation_properties_tests;
