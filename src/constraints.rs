//! Path constraints and the memoizing feasibility store in front of a solver session.

use crate::{
    solver::{SatResult, Solver},
    symbolic::{Assignment, SymbolicValue},
};
use log::{debug, trace};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct Link {
    id: u64,
    predicate: SymbolicValue,
    parent: Option<Arc<Link>>,
    len: usize,
}

/// Append-only conjunction of predicates. Children share their parent's prefix,
/// so forking a path is O(1).
#[derive(Clone, Debug, Default)]
pub struct PathConstraintSet {
    head: Option<Arc<Link>>,
}

impl PathConstraintSet {
    pub fn new() -> Self {
        Self { head: None }
    }

    /// Returns the set extended by `predicate`. `self` is left untouched.
    pub fn assert(&self, predicate: SymbolicValue) -> Self {
        let len = self.len() + 1;

        Self {
            head: Some(Arc::new(Link {
                id: NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed),
                predicate,
                parent: self.head.clone(),
                len,
            })),
        }
    }

    /// Identity of this exact set. Equal ids imply equal predicate sequences.
    pub fn id(&self) -> u64 {
        self.head.as_ref().map_or(0, |l| l.id)
    }

    pub fn len(&self) -> usize {
        self.head.as_ref().map_or(0, |l| l.len)
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Predicates from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &SymbolicValue> {
        self.links().map(|l| &l.predicate)
    }

    /// Predicates in assertion order.
    pub fn to_vec(&self) -> Vec<SymbolicValue> {
        let mut predicates = self.iter().cloned().collect::<Vec<_>>();
        predicates.reverse();
        predicates
    }

    /// `self` was derived from `ancestor` by zero or more assertions.
    pub fn is_extension_of(&self, ancestor: &PathConstraintSet) -> bool {
        if self.len() < ancestor.len() {
            return false;
        }

        match (&ancestor.head, self.links().find(|l| l.len == ancestor.len())) {
            (None, _) => true,
            (Some(a), Some(l)) => Arc::ptr_eq(a, l) || a.id == l.id,
            (Some(_), None) => false,
        }
    }

    fn links(&self) -> impl Iterator<Item = &Arc<Link>> {
        std::iter::successors(self.head.as_ref(), |l| l.parent.as_ref())
    }

    /// Links in assertion order.
    fn chain(&self) -> Vec<Arc<Link>> {
        let mut chain = self.links().cloned().collect::<Vec<_>>();
        chain.reverse();
        chain
    }
}

impl fmt::Display for PathConstraintSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "true");
        }

        let predicates = self.to_vec();
        let mut first = true;

        for predicate in predicates.iter() {
            if !first {
                write!(f, " && ")?;
            }
            write!(f, "{}", predicate)?;
            first = false;
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QueryStatistics {
    pub sat: u64,
    pub unsat: u64,
    pub unknown: u64,
    pub memoized: u64,
}

/// Feasibility oracle owned by a single worker.
///
/// The solver's scope stack mirrors the last queried set: one scope per
/// predicate. A query pops back to the common prefix with the previous set and
/// pushes only the new suffix, so depth-first traversal reuses solver context.
pub struct ConstraintStore<S: Solver> {
    solver: S,
    asserted: Vec<Arc<Link>>,
    memo: HashMap<u64, SatResult>,
    statistics: QueryStatistics,
    solver_times: Vec<Duration>,
}

impl<S: Solver> ConstraintStore<S> {
    pub fn new(solver: S) -> Self {
        Self {
            solver,
            asserted: Vec::new(),
            memo: HashMap::new(),
            statistics: QueryStatistics::default(),
            solver_times: Vec::new(),
        }
    }

    pub fn check(&mut self, set: &PathConstraintSet) -> SatResult {
        if set.is_empty() {
            return SatResult::Sat;
        }

        if let Some(result) = self.memo.get(&set.id()) {
            self.statistics.memoized += 1;
            return *result;
        }

        self.sync(set);

        let (result, took) = time!({ self.solver.check() });
        self.solver_times.push(took);

        match result {
            SatResult::Sat => self.statistics.sat += 1,
            SatResult::Unsat => self.statistics.unsat += 1,
            SatResult::Unknown => {
                self.statistics.unknown += 1;
                debug!("feasibility unknown for {} predicates", set.len());
            }
        }

        self.memo.insert(set.id(), result);

        result
    }

    /// Unknown counts as satisfiable.
    pub fn is_satisfiable(&mut self, set: &PathConstraintSet) -> bool {
        self.check(set) != SatResult::Unsat
    }

    /// Input assignment satisfying `set`, if the solver can produce one.
    pub fn model(&mut self, set: &PathConstraintSet) -> Option<Assignment> {
        self.sync(set);

        match self.solver.check() {
            SatResult::Sat => self.solver.model(),
            _ => None,
        }
    }

    pub fn statistics(&self) -> QueryStatistics {
        self.statistics
    }

    pub fn take_solver_times(&mut self) -> Vec<Duration> {
        std::mem::take(&mut self.solver_times)
    }

    fn sync(&mut self, set: &PathConstraintSet) {
        let chain = set.chain();

        let common = self
            .asserted
            .iter()
            .zip(chain.iter())
            .take_while(|(a, b)| Arc::ptr_eq(a, b))
            .count();

        // results are only kept for sets that are still a prefix of the context
        let stale = self.asserted.len() - common;
        if stale > 0 {
            self.solver.pop(stale);
            for link in self.asserted.drain(common..) {
                self.memo.remove(&link.id);
            }
        }

        trace!(
            "solver context: kept {} predicates, popped {}, pushing {}",
            common,
            stale,
            chain.len() - common
        );

        chain.into_iter().skip(common).for_each(|link| {
            self.solver.push();
            self.solver.assert(&link.predicate);
            self.asserted.push(link);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        solver::ProbeSolver,
        symbolic::{BinaryOp, Expr},
    };

    fn x_greater_than(n: u64) -> SymbolicValue {
        Expr::binary(BinaryOp::Gt, Expr::input("x"), Expr::from_u64(n))
    }

    fn store() -> ConstraintStore<ProbeSolver> {
        ConstraintStore::new(ProbeSolver::new(Duration::from_millis(100)))
    }

    #[test]
    fn children_share_and_extend_their_parent() {
        let root = PathConstraintSet::new();
        let parent = root.assert(x_greater_than(1));
        let left = parent.assert(x_greater_than(5));
        let right = parent.assert(Expr::is_zero(x_greater_than(5)));

        assert!(left.is_extension_of(&parent));
        assert!(right.is_extension_of(&parent));
        assert!(parent.is_extension_of(&root));
        assert!(!left.is_extension_of(&right));
        assert_eq!(left.len(), 2);
        assert_eq!(parent.len(), 1);
    }

    #[test]
    fn repeated_queries_are_memoized() {
        let mut store = store();
        let set = PathConstraintSet::new().assert(x_greater_than(3));

        assert!(store.is_satisfiable(&set));
        assert!(store.is_satisfiable(&set));

        let statistics = store.statistics();
        assert_eq!(statistics.sat, 1);
        assert_eq!(statistics.memoized, 1);
    }

    #[test]
    fn backtracking_reuses_the_common_prefix() {
        let mut store = store();
        let parent = PathConstraintSet::new().assert(x_greater_than(10));
        let infeasible = parent.assert(Expr::binary(
            BinaryOp::Lt,
            Expr::input("x"),
            Expr::from_u64(4),
        ));
        let feasible = parent.assert(x_greater_than(20));

        assert_eq!(store.check(&infeasible), SatResult::Unsat);
        assert_eq!(store.check(&feasible), SatResult::Sat);
        assert_eq!(store.asserted.len(), 2);
        assert!(Arc::ptr_eq(&store.asserted[0], &parent.chain()[0]));
        assert_eq!(store.memo.len(), 1);
        assert!(store.memo.contains_key(&feasible.id()));
        assert!(!store.memo.contains_key(&infeasible.id()));

        let model = store.model(&feasible).expect("feasible set has a model");
        assert!(model.get("x").copied().unwrap_or_default() > crate::symbolic::Word::from(20_u64));
    }
}
