//! Interactive micromagnetic script engine.
//!
//! The binary compiles a script against the built-in [`world`], opens the
//! compute device on the main thread and runs the script through an
//! [`executor::Executor`] while a [`control::ControlServer`] accepts remote
//! statements and mode changes.

pub mod cli;
pub mod control;
pub mod device;
pub mod executor;
pub mod mesh;
pub mod output;
pub mod runtime;
pub mod session;
pub mod solver;
pub mod world;
