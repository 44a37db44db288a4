//! Test helpers shared across crates, most importantly the backend
//! conformance suite that every `Backend` implementation must pass.

pub mod backend_test_suite;
