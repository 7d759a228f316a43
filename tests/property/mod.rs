//! Property-based tests for replay, inheritance and persistence guarantees

mod determinism;
