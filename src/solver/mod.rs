//! Incremental satisfiability backends over 256-bit bit-vector predicates.
//!
//! A solver session keeps an assertion stack. Every asserted predicate is a
//! symbolic word that is required to be non-zero. Backends answer `check` with
//! sat, unsat or unknown, where unknown covers both timeouts and fragments the
//! backend cannot decide.

pub mod none;
pub mod probe;
#[cfg(feature = "z3")]
pub mod z3;

pub use self::{none::NoneSolver, probe::ProbeSolver};
#[cfg(feature = "z3")]
pub use self::z3::Z3Solver;

use crate::symbolic::{Assignment, SymbolicValue};
use log::trace;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown,
}

pub trait Solver {
    fn new(timeout: Duration) -> Self
    where
        Self: Sized;

    fn name() -> &'static str
    where
        Self: Sized;

    /// Opens a new assertion scope.
    fn push(&mut self);

    /// Discards the `n` innermost scopes and everything asserted in them.
    fn pop(&mut self, n: usize);

    fn assert(&mut self, predicate: &SymbolicValue);

    fn check(&mut self) -> SatResult {
        let result = time_trace!("finished satisfiability check", { self.check_impl() });

        trace!("solver answered {:?}", result);

        result
    }

    fn check_impl(&mut self) -> SatResult;

    /// Input assignment witnessing the last `Sat` answer.
    fn model(&mut self) -> Option<Assignment>;
}
