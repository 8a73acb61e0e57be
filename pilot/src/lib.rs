//! Natural-language browser script compiler and retry-driven execution engine.
//!
//! A task script is parsed into instruction blocks. Each block is turned into
//! a short action by a language model, checked by a static safety gate and
//! executed against a browser capability surface. Failed actions are
//! re-synthesized with a diagnostic, up to a bounded number of attempts, and
//! a finished run can be saved as a compiled document for replay without
//! model calls.
//!
//! - **[`core`]**: pure logic (script parsing, the action language, the gate,
//!   the prompt cache, attempt history). No I/O.
//! - **[`io`]**: config, compiled documents, prompt templates, model backends,
//!   child processes and capability surfaces.
//!
//! Orchestration lives in [`synth`], [`retry`], [`interpret`] and [`engine`].

pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod interpret;
pub mod io;
pub mod logging;
pub mod retry;
pub mod synth;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
