//! Unit test entry point for tests under `tests/unit/`.

mod unit;
