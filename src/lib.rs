#[macro_use]
pub mod util;

pub mod cli;
pub mod config;
pub mod constraints;
pub mod engine;
pub mod program;
pub mod report;
pub mod solver;
pub mod symbolic;

pub use crate::{
    config::{Config, SolverBackend},
    engine::{run, ExitCode, Inputs, TargetedParameters},
    program::Program,
    report::{ContractReport, RunReport},
};
