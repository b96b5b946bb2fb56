use super::{SatResult, Solver};
use crate::symbolic::{Assignment, SymbolicValue};
use std::time::Duration;

/// Never decides anything. Every path is kept as feasible and counted as unknown.
pub struct NoneSolver {}

impl Solver for NoneSolver {
    fn name() -> &'static str {
        "None"
    }

    fn new(_timeout: Duration) -> Self {
        Self {}
    }

    fn push(&mut self) {}

    fn pop(&mut self, _n: usize) {}

    fn assert(&mut self, _predicate: &SymbolicValue) {}

    fn check_impl(&mut self) -> SatResult {
        SatResult::Unknown
    }

    fn model(&mut self) -> Option<Assignment> {
        None
    }
}
