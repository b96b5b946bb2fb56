use super::word::{self, Word};
use std::{fmt, sync::Arc};
use strum::{Display, IntoStaticStr};

/// Immutable symbolic word. Sub-expressions are shared between machine states.
pub type SymbolicValue = Arc<Expr>;

#[derive(Clone, Copy, Debug, Display, Eq, Hash, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum UnaryOp {
    IsZero,
    Not,
}

#[derive(Clone, Copy, Debug, Display, Eq, Hash, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    SDiv,
    Mod,
    SMod,
    Exp,
    SignExtend,
    Lt,
    Gt,
    SLt,
    SGt,
    Eq,
    And,
    Or,
    Xor,
    Byte,
    Shl,
    Shr,
    Sar,
}

impl BinaryOp {
    /// Comparisons produce 0 or 1.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::SLt | BinaryOp::SGt | BinaryOp::Eq
        )
    }

    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::Eq
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Xor
        )
    }

    pub fn apply(&self, a: Word, b: Word) -> Word {
        match self {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div => word::div(a, b),
            BinaryOp::SDiv => word::sdiv(a, b),
            BinaryOp::Mod => word::rem(a, b),
            BinaryOp::SMod => word::smod(a, b),
            BinaryOp::Exp => word::exp(a, b),
            BinaryOp::SignExtend => word::sign_extend(a, b),
            BinaryOp::Lt => word::from_bool(a < b),
            BinaryOp::Gt => word::from_bool(a > b),
            BinaryOp::SLt => word::from_bool(word::slt(a, b)),
            BinaryOp::SGt => word::from_bool(word::sgt(a, b)),
            BinaryOp::Eq => word::from_bool(a == b),
            BinaryOp::And => a & b,
            BinaryOp::Or => a | b,
            BinaryOp::Xor => a ^ b,
            BinaryOp::Byte => word::byte(a, b),
            BinaryOp::Shl => word::shl(a, b),
            BinaryOp::Shr => word::shr(a, b),
            BinaryOp::Sar => word::sar(a, b),
        }
    }
}

impl UnaryOp {
    pub fn apply(&self, a: Word) -> Word {
        match self {
            UnaryOp::IsZero => word::from_bool(a.is_zero()),
            UnaryOp::Not => !a,
        }
    }
}

#[derive(Clone, Copy, Debug, Display, Eq, Hash, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum TernaryOp {
    AddMod,
    MulMod,
    Ite,
}

impl TernaryOp {
    pub fn apply(&self, a: Word, b: Word, c: Word) -> Word {
        match self {
            TernaryOp::AddMod => word::add_mod(a, b, c),
            TernaryOp::MulMod => word::mul_mod(a, b, c),
            TernaryOp::Ite => {
                if a.is_zero() {
                    c
                } else {
                    b
                }
            }
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Expr {
    Const(Word),
    /// Unconstrained input, identified by its name.
    Input(Arc<str>),
    Unary(UnaryOp, SymbolicValue),
    Binary(BinaryOp, SymbolicValue, SymbolicValue),
    Ternary(TernaryOp, SymbolicValue, SymbolicValue, SymbolicValue),
    /// Uninterpreted hash over the big-endian concatenation of its arguments.
    Keccak(Vec<SymbolicValue>),
}

impl Expr {
    pub fn constant(value: Word) -> SymbolicValue {
        Arc::new(Expr::Const(value))
    }

    pub fn from_u64(value: u64) -> SymbolicValue {
        Self::constant(Word::from(value))
    }

    pub fn from_bool(value: bool) -> SymbolicValue {
        Self::constant(word::from_bool(value))
    }

    pub fn input<S: AsRef<str>>(name: S) -> SymbolicValue {
        Arc::new(Expr::Input(Arc::from(name.as_ref())))
    }

    pub fn as_const(&self) -> Option<Word> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Expr::Const(_))
    }

    /// The value is known to be either 0 or 1.
    pub fn is_boolean(&self) -> bool {
        match self {
            Expr::Const(c) => *c <= Word::from(1_u64),
            Expr::Unary(UnaryOp::IsZero, _) => true,
            Expr::Binary(op, _, _) => op.is_comparison(),
            _ => false,
        }
    }

    pub fn unary(op: UnaryOp, a: SymbolicValue) -> SymbolicValue {
        if let Some(c) = a.as_const() {
            return Self::constant(op.apply(c));
        }

        match (op, &*a) {
            // iszero(iszero(b)) == b for boolean b
            (UnaryOp::IsZero, Expr::Unary(UnaryOp::IsZero, inner)) if inner.is_boolean() => {
                inner.clone()
            }
            (UnaryOp::Not, Expr::Unary(UnaryOp::Not, inner)) => inner.clone(),
            _ => Arc::new(Expr::Unary(op, a)),
        }
    }

    pub fn binary(op: BinaryOp, a: SymbolicValue, b: SymbolicValue) -> SymbolicValue {
        if let (Some(x), Some(y)) = (a.as_const(), b.as_const()) {
            return Self::constant(op.apply(x, y));
        }

        if let Some(folded) = Self::simplify_binary(op, &a, &b) {
            return folded;
        }

        // constants go left for commutative operators, so equal terms print equally
        if op.is_commutative() && b.is_const() {
            Arc::new(Expr::Binary(op, b, a))
        } else {
            Arc::new(Expr::Binary(op, a, b))
        }
    }

    fn simplify_binary(
        op: BinaryOp,
        a: &SymbolicValue,
        b: &SymbolicValue,
    ) -> Option<SymbolicValue> {
        let zero = Word::ZERO;
        let one = Word::from(1_u64);

        let (constant, other) = match (a.as_const(), b.as_const()) {
            (Some(c), None) => (Some(c), b),
            (None, Some(c)) => (Some(c), a),
            _ => (None, a),
        };

        match op {
            BinaryOp::Sub | BinaryOp::Xor if a == b => Some(Self::constant(zero)),
            BinaryOp::Eq if a == b => Some(Self::constant(one)),
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::SLt | BinaryOp::SGt if a == b => {
                Some(Self::constant(zero))
            }
            BinaryOp::And | BinaryOp::Or if a == b => Some(a.clone()),
            BinaryOp::Add | BinaryOp::Or | BinaryOp::Xor if constant == Some(zero) => {
                Some(other.clone())
            }
            BinaryOp::Sub if b.as_const() == Some(zero) => Some(a.clone()),
            BinaryOp::Mul if constant == Some(one) => Some(other.clone()),
            BinaryOp::Mul | BinaryOp::And if constant == Some(zero) => Some(Self::constant(zero)),
            BinaryOp::And if constant == Some(Word::MAX) => Some(other.clone()),
            BinaryOp::And => Self::simplify_mask(constant?, other),
            BinaryOp::Shl | BinaryOp::Shr if a.as_const() == Some(zero) => Some(b.clone()),
            BinaryOp::Div if b.as_const() == Some(one) => Some(a.clone()),
            // eq(x, 0) is the same predicate as iszero(x)
            BinaryOp::Eq if constant == Some(zero) => {
                Some(Self::unary(UnaryOp::IsZero, other.clone()))
            }
            // eq(b, 1) == b for boolean b
            BinaryOp::Eq if constant == Some(one) && other.is_boolean() => Some(other.clone()),
            _ => None,
        }
    }

    /// `and(mask, shr(k, x))` with `mask == MAX >> k` is a no-op mask (selector extraction).
    fn simplify_mask(mask: Word, other: &SymbolicValue) -> Option<SymbolicValue> {
        if let Expr::Binary(BinaryOp::Shr, shift, _) = &**other {
            let shift = shift.as_const()?;
            if word::shr(shift, Word::MAX) == mask {
                return Some(other.clone());
            }
        }

        if other.is_boolean() && mask.bit(0) {
            return Some(other.clone());
        }

        None
    }

    pub fn ternary(
        op: TernaryOp,
        a: SymbolicValue,
        b: SymbolicValue,
        c: SymbolicValue,
    ) -> SymbolicValue {
        if let (Some(x), Some(y), Some(z)) = (a.as_const(), b.as_const(), c.as_const()) {
            return Self::constant(op.apply(x, y, z));
        }

        if op == TernaryOp::Ite {
            if let Some(condition) = a.as_const() {
                return if condition.is_zero() { c } else { b };
            }
            if b == c {
                return b;
            }
        }

        Arc::new(Expr::Ternary(op, a, b, c))
    }

    /// Hash of the argument words. Folds to the real hash when all arguments are concrete.
    pub fn keccak(args: Vec<SymbolicValue>) -> SymbolicValue {
        let concrete = args.iter().map(|a| a.as_const()).collect::<Option<Vec<_>>>();

        match concrete {
            Some(words) => Self::constant(word::keccak(&words)),
            None => Arc::new(Expr::Keccak(args)),
        }
    }

    pub fn is_zero(a: SymbolicValue) -> SymbolicValue {
        Self::unary(UnaryOp::IsZero, a)
    }

    pub fn eq(a: SymbolicValue, b: SymbolicValue) -> SymbolicValue {
        Self::binary(BinaryOp::Eq, a, b)
    }

    /// Predicate that holds when `a` is non-zero.
    pub fn is_non_zero(a: SymbolicValue) -> SymbolicValue {
        if a.is_boolean() {
            a
        } else {
            Self::is_zero(Self::is_zero(a))
        }
    }

    /// Visits every distinct input name below this expression.
    pub fn collect_inputs(&self, inputs: &mut std::collections::BTreeSet<Arc<str>>) {
        match self {
            Expr::Const(_) => {}
            Expr::Input(name) => {
                inputs.insert(name.clone());
            }
            Expr::Unary(_, a) => a.collect_inputs(inputs),
            Expr::Binary(_, a, b) => {
                a.collect_inputs(inputs);
                b.collect_inputs(inputs);
            }
            Expr::Ternary(_, a, b, c) => {
                a.collect_inputs(inputs);
                b.collect_inputs(inputs);
                c.collect_inputs(inputs);
            }
            Expr::Keccak(args) => args.iter().for_each(|a| a.collect_inputs(inputs)),
        }
    }

    /// Visits every constant below this expression.
    pub fn collect_constants(&self, constants: &mut Vec<Word>) {
        match self {
            Expr::Const(c) => constants.push(*c),
            Expr::Input(_) => {}
            Expr::Unary(_, a) => a.collect_constants(constants),
            Expr::Binary(_, a, b) => {
                a.collect_constants(constants);
                b.collect_constants(constants);
            }
            Expr::Ternary(_, a, b, c) => {
                a.collect_constants(constants);
                b.collect_constants(constants);
                c.collect_constants(constants);
            }
            Expr::Keccak(args) => args.iter().for_each(|a| a.collect_constants(constants)),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{:#x}", c),
            Expr::Input(name) => write!(f, "{}", name),
            Expr::Unary(op, a) => write!(f, "({} {})", op, a),
            Expr::Binary(op, a, b) => write!(f, "({} {} {})", op, a, b),
            Expr::Ternary(op, a, b, c) => write!(f, "({} {} {} {})", op, a, b, c),
            Expr::Keccak(args) => {
                write!(f, "(keccak")?;
                args.iter().try_for_each(|a| write!(f, " {}", a))?;
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> SymbolicValue {
        Expr::input("x")
    }

    #[test]
    fn concrete_operands_are_folded_eagerly() {
        let sum = Expr::binary(BinaryOp::Add, Expr::constant(Word::MAX), Expr::from_u64(2));

        assert_eq!(sum.as_const(), Some(Word::from(1_u64)));
    }

    #[test]
    fn symbolic_operands_build_shared_nodes() {
        let sum = Expr::binary(BinaryOp::Add, x(), Expr::from_u64(2));

        assert_eq!(sum.to_string(), "(add 0x2 x)");
        assert!(!sum.is_const());
    }

    #[test]
    fn double_negation_of_predicates_cancels() {
        let predicate = Expr::binary(BinaryOp::Gt, x(), Expr::from_u64(0));
        let negated = Expr::is_zero(predicate.clone());

        assert_eq!(Expr::is_zero(negated), predicate);
    }

    #[test]
    fn selector_masking_is_dropped() {
        let selector = Expr::binary(BinaryOp::Shr, Expr::from_u64(224), x());
        let masked = Expr::binary(BinaryOp::And, Expr::from_u64(0xffff_ffff), selector.clone());

        assert_eq!(masked, selector);
    }

    #[test]
    fn ite_with_concrete_condition_selects_branch() {
        let v = Expr::ternary(TernaryOp::Ite, Expr::from_u64(0), x(), Expr::from_u64(7));

        assert_eq!(v.as_const(), Some(Word::from(7_u64)));
    }
}
