//! This crate only hosts integration tests; see `tests/`.
