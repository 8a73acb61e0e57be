//! Deterministic, pure logic shared by the compiler and the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod action;
pub mod cache;
pub mod gate;
pub mod history;
pub mod script;
pub mod types;
