//! Conformance suites shared by every reclamation backend.
//!
//! The functions are generic over the map's `Guard` and are driven by `rstest`
//! cases from the `tests/` directories of the workspace crates.

pub mod navigable_map_core_tests;
pub mod navigable_map_stress_tests;
