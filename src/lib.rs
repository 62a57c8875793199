pub mod agent;
pub mod config;
pub mod consts;
pub mod error;
pub mod grader;
pub mod runner;
pub mod synth;
pub mod trace;
