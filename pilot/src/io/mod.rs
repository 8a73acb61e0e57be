//! Side-effecting collaborators: files, child processes, prompts and surfaces.

pub mod compiled;
pub mod config;
pub mod model;
pub mod process;
pub mod prompt;
pub mod surface;
