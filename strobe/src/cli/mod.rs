//! Command-line interface

pub mod args;

pub use args::{Args, Format};
