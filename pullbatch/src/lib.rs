#![warn(clippy::all, rust_2018_idioms)]

mod args;
pub mod logging;
pub mod runner;

pub use args::{Args, SinkKind};
pub use runner::{report, run, RunError};
