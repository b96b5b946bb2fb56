use super::{byte_len, push, Effect, SemanticsTable};
use crate::{
    engine::{machine::MachineState, result::Outcome},
    program::Opcode,
    symbolic::{BinaryOp, Expr, TernaryOp, UnaryOp},
};

const EXP_BYTE_GAS: u64 = 50;

pub(super) fn register(table: &mut SemanticsTable) {
    table.register(Opcode::Add, |s, _, _| binary(s, BinaryOp::Add));
    table.register(Opcode::Mul, |s, _, _| binary(s, BinaryOp::Mul));
    table.register(Opcode::Sub, |s, _, _| binary(s, BinaryOp::Sub));
    table.register(Opcode::Div, |s, _, _| binary(s, BinaryOp::Div));
    table.register(Opcode::SDiv, |s, _, _| binary(s, BinaryOp::SDiv));
    table.register(Opcode::Mod, |s, _, _| binary(s, BinaryOp::Mod));
    table.register(Opcode::SMod, |s, _, _| binary(s, BinaryOp::SMod));
    table.register(Opcode::AddMod, |s, _, _| ternary(s, TernaryOp::AddMod));
    table.register(Opcode::MulMod, |s, _, _| ternary(s, TernaryOp::MulMod));
    table.register(Opcode::Exp, |s, _, _| exp(s));
    table.register(Opcode::SignExtend, |s, _, _| {
        binary(s, BinaryOp::SignExtend)
    });

    table.register(Opcode::Lt, |s, _, _| binary(s, BinaryOp::Lt));
    table.register(Opcode::Gt, |s, _, _| binary(s, BinaryOp::Gt));
    table.register(Opcode::SLt, |s, _, _| binary(s, BinaryOp::SLt));
    table.register(Opcode::SGt, |s, _, _| binary(s, BinaryOp::SGt));
    table.register(Opcode::Eq, |s, _, _| binary(s, BinaryOp::Eq));
    table.register(Opcode::IsZero, |s, _, _| unary(s, UnaryOp::IsZero));

    table.register(Opcode::And, |s, _, _| binary(s, BinaryOp::And));
    table.register(Opcode::Or, |s, _, _| binary(s, BinaryOp::Or));
    table.register(Opcode::Xor, |s, _, _| binary(s, BinaryOp::Xor));
    table.register(Opcode::Not, |s, _, _| unary(s, UnaryOp::Not));
    table.register(Opcode::Byte, |s, _, _| binary(s, BinaryOp::Byte));
    table.register(Opcode::Shl, |s, _, _| binary(s, BinaryOp::Shl));
    table.register(Opcode::Shr, |s, _, _| binary(s, BinaryOp::Shr));
    table.register(Opcode::Sar, |s, _, _| binary(s, BinaryOp::Sar));
}

fn unary(state: &mut MachineState, op: UnaryOp) -> Result<Effect, Outcome> {
    let a = state.pop()?;

    push(state, Expr::unary(op, a))
}

/// The first operand is the former top of the stack.
fn binary(state: &mut MachineState, op: BinaryOp) -> Result<Effect, Outcome> {
    let [a, b] = state.pop_n()?;

    push(state, Expr::binary(op, a, b))
}

fn ternary(state: &mut MachineState, op: TernaryOp) -> Result<Effect, Outcome> {
    let [a, b, n] = state.pop_n()?;

    push(state, Expr::ternary(op, a, b, n))
}

fn exp(state: &mut MachineState) -> Result<Effect, Outcome> {
    let [base, exponent] = state.pop_n()?;

    // a symbolic exponent is charged as a full word
    let bytes = exponent.as_const().map_or(32, |e| byte_len(&e));
    state.charge(EXP_BYTE_GAS * bytes)?;

    push(state, Expr::binary(BinaryOp::Exp, base, exponent))
}

#[cfg(test)]
mod tests {
    use crate::engine::semantics::tests_support::*;
    use crate::{program::Opcode, symbolic::Word};

    #[test]
    fn operands_are_taken_in_stack_order() {
        let mut state = state_with(&[3, 10]);

        dispatch(&mut state, Opcode::Sub).expect("two operands");

        assert_eq!(top(&state), Some(Word::from(7_u64)));
    }

    #[test]
    fn comparisons_with_symbolic_operands_stay_symbolic() {
        let mut state = state_with(&[0]);
        state
            .push(crate::symbolic::Expr::input("x"))
            .expect("room on the stack");

        dispatch(&mut state, Opcode::Gt).expect("two operands");

        assert_eq!(
            state.pop().expect("result").to_string(),
            "(gt x 0x0)".to_string()
        );
    }

    #[test]
    fn exponent_size_is_charged() {
        let mut state = state_with(&[0x10, 2]);

        dispatch(&mut state, Opcode::Exp).expect("two operands");

        assert_eq!(state.gas_used(), 50);
        assert_eq!(top(&state), Some(Word::from(0x10000_u64)));
    }
}
