//! Side-effecting operations: environment, processes, signals, filesystem.

pub mod artifact;
pub mod capture;
pub mod compress;
pub mod config;
pub mod process;
pub mod signals;
