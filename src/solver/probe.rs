//! Built-in incomplete solver.
//!
//! Unsatisfiability is only claimed when it can be proven cheaply: a constant
//! false assertion, contradicting interval bounds on a common term, or a closed
//! conjunction that evaluates to false. Satisfiability is only claimed with a
//! witness found by a bounded local search over candidate values. Everything
//! else is unknown.

use super::{SatResult, Solver};
use crate::symbolic::{word, Assignment, BinaryOp, Evaluator, Expr, SymbolicValue, UnaryOp, Word};
use log::trace;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};

/// Maximum number of candidate assignments evaluated per check.
const SEARCH_BUDGET: usize = 4096;

pub struct ProbeSolver {
    timeout: Duration,
    assertions: Vec<SymbolicValue>,
    scopes: Vec<usize>,
    model: Option<Assignment>,
}

impl Solver for ProbeSolver {
    fn name() -> &'static str {
        "Probe"
    }

    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            assertions: Vec::new(),
            scopes: Vec::new(),
            model: None,
        }
    }

    fn push(&mut self) {
        self.scopes.push(self.assertions.len());
    }

    fn pop(&mut self, n: usize) {
        for _ in 0..n {
            if let Some(len) = self.scopes.pop() {
                self.assertions.truncate(len);
            }
        }
    }

    fn assert(&mut self, predicate: &SymbolicValue) {
        self.assertions.push(predicate.clone());
    }

    fn check_impl(&mut self) -> SatResult {
        self.model = None;

        let deadline = Instant::now() + self.timeout;

        let mut bounds = Bounds::default();
        self.assertions.iter().for_each(|a| bounds.learn(a, true));

        if bounds.is_contradictory() {
            trace!("bounds of {} assertions contradict", self.assertions.len());
            return SatResult::Unsat;
        }

        let mut inputs = BTreeSet::new();
        self.assertions
            .iter()
            .for_each(|a| a.collect_inputs(&mut inputs));

        if inputs.is_empty() {
            let assignment = Assignment::new();

            return if self.satisfied(&assignment) == self.assertions.len() {
                self.model = Some(assignment);
                SatResult::Sat
            } else {
                SatResult::Unsat
            };
        }

        let candidates = self.candidates(&bounds, &inputs);

        match self.search(&candidates, deadline) {
            Some(assignment) => {
                self.model = Some(assignment);
                SatResult::Sat
            }
            None => SatResult::Unknown,
        }
    }

    fn model(&mut self) -> Option<Assignment> {
        self.model.clone()
    }
}

impl ProbeSolver {
    fn satisfied(&self, assignment: &Assignment) -> usize {
        let mut evaluator = Evaluator::new(assignment);

        self.assertions
            .iter()
            .filter(|a| evaluator.holds(a))
            .count()
    }

    /// Candidate values per input, most promising first.
    fn candidates(
        &self,
        bounds: &Bounds,
        inputs: &BTreeSet<Arc<str>>,
    ) -> BTreeMap<Arc<str>, Vec<Word>> {
        let mut candidates: BTreeMap<Arc<str>, Vec<Word>> =
            inputs.iter().map(|i| (i.clone(), Vec::new())).collect();

        bounds
            .terms
            .iter()
            .zip(bounds.intervals.iter())
            .flat_map(|(term, interval)| interval.picks().into_iter().map(move |p| (term, p)))
            .filter_map(|(term, target)| invert(term, target))
            .for_each(|(input, value)| {
                if let Some(values) = candidates.get_mut(&input) {
                    values.push(value);
                }
            });

        let mut constants = vec![Word::ZERO, Word::from(1_u64), Word::MAX];
        self.assertions
            .iter()
            .for_each(|a| a.collect_constants(&mut constants));

        let shared = constants
            .iter()
            .flat_map(|c| {
                [
                    *c,
                    c.wrapping_add(Word::from(1_u64)),
                    c.wrapping_sub(Word::from(1_u64)),
                ]
            })
            .collect::<Vec<_>>();

        candidates.values_mut().for_each(|values| {
            values.extend(shared.iter().copied());

            let mut seen = BTreeSet::new();
            values.retain(|v| seen.insert(*v));
        });

        candidates
    }

    /// Greedy coordinate search. Accepts a change only if more assertions hold.
    fn search(
        &self,
        candidates: &BTreeMap<Arc<str>, Vec<Word>>,
        deadline: Instant,
    ) -> Option<Assignment> {
        let total = self.assertions.len();

        let mut assignment: Assignment = candidates
            .iter()
            .map(|(input, values)| {
                (
                    input.clone(),
                    values.first().copied().unwrap_or(Word::ZERO),
                )
            })
            .collect();

        let mut best = self.satisfied(&assignment);
        let mut evaluations = 1;

        loop {
            if best == total {
                return Some(assignment);
            }

            let mut improved = false;

            for (input, values) in candidates.iter() {
                for value in values.iter() {
                    if evaluations >= SEARCH_BUDGET || Instant::now() >= deadline {
                        return None;
                    }

                    let previous = assignment.insert(input.clone(), *value);
                    evaluations += 1;

                    let score = self.satisfied(&assignment);

                    if score > best {
                        best = score;
                        improved = true;

                        if best == total {
                            return Some(assignment);
                        }
                    } else if let Some(previous) = previous {
                        assignment.insert(input.clone(), previous);
                    }
                }
            }

            if !improved {
                return None;
            }
        }
    }
}

/// Solves `term == target` for a single input if `term` is invertible.
fn invert(term: &SymbolicValue, target: Word) -> Option<(Arc<str>, Word)> {
    match &**term {
        Expr::Input(name) => Some((name.clone(), target)),
        Expr::Unary(UnaryOp::Not, t) => invert(t, !target),
        Expr::Binary(op, a, b) => match (op, a.as_const(), b.as_const()) {
            (BinaryOp::Add, Some(c), None) => invert(b, target.wrapping_sub(c)),
            (BinaryOp::Add, None, Some(c)) => invert(a, target.wrapping_sub(c)),
            (BinaryOp::Sub, None, Some(c)) => invert(a, target.wrapping_add(c)),
            (BinaryOp::Sub, Some(c), None) => invert(b, c.wrapping_sub(target)),
            (BinaryOp::Xor, Some(c), None) => invert(b, target ^ c),
            (BinaryOp::Xor, None, Some(c)) => invert(a, target ^ c),
            (BinaryOp::Shr, Some(k), None) => invert(b, word::shl(k, target)),
            (BinaryOp::Shl, Some(k), None) => invert(b, word::shr(k, target)),
            (BinaryOp::And | BinaryOp::Or, Some(_), None) => invert(b, target),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Clone, Debug)]
struct Interval {
    lo: Word,
    hi: Word,
    excluded: BTreeSet<Word>,
}

impl Interval {
    fn full() -> Self {
        Self {
            lo: Word::ZERO,
            hi: Word::MAX,
            excluded: BTreeSet::new(),
        }
    }

    fn at_most(&mut self, bound: Word) {
        self.hi = self.hi.min(bound);
    }

    fn at_least(&mut self, bound: Word) {
        self.lo = self.lo.max(bound);
    }

    fn is_empty(&self) -> bool {
        if self.lo > self.hi {
            return true;
        }

        let excluded = self.excluded.range(self.lo..=self.hi).count();

        Word::from(excluded) > self.hi - self.lo
    }

    /// A few admissible values near both ends.
    fn picks(&self) -> Vec<Word> {
        let one = Word::from(1_u64);
        let mut picks = Vec::new();

        let mut low = self.lo;
        while self.excluded.contains(&low) && low < self.hi {
            low += one;
        }
        picks.push(low);

        let mut high = self.hi;
        while self.excluded.contains(&high) && high > self.lo {
            high -= one;
        }
        picks.push(high);

        picks
    }
}

/// Interval facts implied by the assertions, keyed by structurally equal terms.
#[derive(Default)]
struct Bounds {
    terms: Vec<SymbolicValue>,
    intervals: Vec<Interval>,
    index: HashMap<SymbolicValue, usize>,
    contradiction: bool,
}

impl Bounds {
    fn interval(&mut self, term: &SymbolicValue) -> &mut Interval {
        let idx = match self.index.get(term) {
            Some(idx) => *idx,
            None => {
                self.terms.push(term.clone());
                self.intervals.push(Interval::full());
                self.index.insert(term.clone(), self.terms.len() - 1);
                self.terms.len() - 1
            }
        };

        &mut self.intervals[idx]
    }

    fn is_contradictory(&self) -> bool {
        self.contradiction || self.intervals.iter().any(Interval::is_empty)
    }

    /// Records what `predicate` (or its negation) implies about compared terms.
    fn learn(&mut self, predicate: &SymbolicValue, holds: bool) {
        match &**predicate {
            Expr::Const(c) => {
                if c.is_zero() == holds {
                    self.contradiction = true;
                }
            }
            Expr::Unary(UnaryOp::IsZero, inner) if inner.is_boolean() => self.learn(inner, !holds),
            Expr::Unary(UnaryOp::IsZero, inner) => self.learn_zero(inner, holds),
            Expr::Binary(BinaryOp::Lt, a, b) => self.learn_less(a, b, holds),
            Expr::Binary(BinaryOp::Gt, a, b) => self.learn_less(b, a, holds),
            Expr::Binary(BinaryOp::Eq, a, b) => {
                let (constant, term) = match (a.as_const(), b.as_const()) {
                    (Some(c), None) => (c, b),
                    (None, Some(c)) => (c, a),
                    _ => return,
                };

                let interval = self.interval(term);
                if holds {
                    interval.at_least(constant);
                    interval.at_most(constant);
                } else {
                    interval.excluded.insert(constant);
                }
            }
            _ if predicate.is_boolean() => {}
            _ => self.learn_zero(predicate, !holds),
        }
    }

    fn learn_zero(&mut self, term: &SymbolicValue, is_zero: bool) {
        let interval = self.interval(term);

        if is_zero {
            interval.at_most(Word::ZERO);
        } else {
            interval.excluded.insert(Word::ZERO);
        }
    }

    /// `lhs < rhs` if `holds`, `lhs >= rhs` otherwise.
    fn learn_less(&mut self, lhs: &SymbolicValue, rhs: &SymbolicValue, holds: bool) {
        let one = Word::from(1_u64);

        match (lhs.as_const(), rhs.as_const(), holds) {
            (None, Some(c), true) => match c.checked_sub(one) {
                Some(bound) => self.interval(lhs).at_most(bound),
                None => self.contradiction = true,
            },
            (None, Some(c), false) => self.interval(lhs).at_least(c),
            (Some(c), None, true) => match c.checked_add(one) {
                Some(bound) => self.interval(rhs).at_least(bound),
                None => self.contradiction = true,
            },
            (Some(c), None, false) => self.interval(rhs).at_most(c),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> SymbolicValue {
        Expr::input("x")
    }

    fn solver() -> ProbeSolver {
        ProbeSolver::new(Duration::from_millis(100))
    }

    #[test]
    fn contradicting_bounds_are_unsat() {
        let mut solver = solver();
        solver.assert(&Expr::binary(BinaryOp::Gt, x(), Expr::from_u64(10)));
        solver.assert(&Expr::binary(BinaryOp::Lt, x(), Expr::from_u64(5)));

        assert_eq!(solver.check(), SatResult::Unsat);
    }

    #[test]
    fn finds_witness_through_selector_extraction() {
        let selector = Expr::binary(BinaryOp::Shr, Expr::from_u64(224), x());

        let mut solver = solver();
        solver.assert(&Expr::eq(Expr::from_u64(0xa9059cbb), selector));

        assert_eq!(solver.check(), SatResult::Sat);

        let model = solver.model().expect("sat answers carry a model");
        assert_eq!(
            model.get("x").copied(),
            Some(Word::from(0xa9059cbb_u64) << 224_usize)
        );
    }

    #[test]
    fn popping_a_scope_forgets_its_assertions() {
        let mut solver = solver();
        solver.push();
        solver.assert(&Expr::from_u64(0));

        assert_eq!(solver.check(), SatResult::Unsat);

        solver.pop(1);
        solver.push();
        solver.assert(&Expr::is_zero(x()));

        assert_eq!(solver.check(), SatResult::Sat);
    }

    #[test]
    fn excluded_singleton_is_unsat() {
        let mut solver = solver();
        solver.assert(&Expr::eq(Expr::from_u64(7), x()));
        solver.assert(&Expr::is_zero(Expr::eq(Expr::from_u64(7), x())));

        assert_eq!(solver.check(), SatResult::Unsat);
    }
}
