use super::{
    value::{Expr, SymbolicValue},
    word::{self, Word},
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

/// Values for named inputs. Inputs without an entry evaluate to zero.
pub type Assignment = BTreeMap<Arc<str>, Word>;

/// Evaluates expressions under a fixed assignment, caching shared sub-expressions.
pub struct Evaluator<'a> {
    assignment: &'a Assignment,
    cache: HashMap<*const Expr, Word>,
}

impl<'a> Evaluator<'a> {
    pub fn new(assignment: &'a Assignment) -> Self {
        Self {
            assignment,
            cache: HashMap::new(),
        }
    }

    pub fn eval(&mut self, expr: &SymbolicValue) -> Word {
        let key = Arc::as_ptr(expr);

        if let Some(value) = self.cache.get(&key) {
            return *value;
        }

        let value = match &**expr {
            Expr::Const(c) => *c,
            Expr::Input(name) => self.assignment.get(name).copied().unwrap_or(Word::ZERO),
            Expr::Unary(op, a) => {
                let a = self.eval(a);
                op.apply(a)
            }
            Expr::Binary(op, a, b) => {
                let a = self.eval(a);
                let b = self.eval(b);
                op.apply(a, b)
            }
            Expr::Ternary(op, a, b, c) => {
                let a = self.eval(a);
                let b = self.eval(b);
                let c = self.eval(c);
                op.apply(a, b, c)
            }
            Expr::Keccak(args) => {
                let words = args.iter().map(|a| self.eval(a)).collect::<Vec<_>>();
                word::keccak(&words)
            }
        };

        self.cache.insert(key, value);

        value
    }

    /// A predicate holds when it evaluates to a non-zero word.
    pub fn holds(&mut self, predicate: &SymbolicValue) -> bool {
        !self.eval(predicate).is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::BinaryOp;

    #[test]
    fn evaluates_under_assignment() {
        let x = Expr::input("x");
        let predicate = Expr::binary(BinaryOp::Gt, x, Expr::from_u64(3));

        let mut assignment = Assignment::new();
        assignment.insert(Arc::from("x"), Word::from(4_u64));

        assert!(Evaluator::new(&assignment).holds(&predicate));
        assert!(!Evaluator::new(&Assignment::new()).holds(&predicate));
    }
}
