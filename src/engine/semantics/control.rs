use super::{push, static_guard, Effect, SemanticsTable};
use crate::{
    engine::{
        machine::{MachineState, ReturnData},
        result::{Fault, Outcome},
        Env,
    },
    program::{Instruction, Opcode},
    symbolic::{word, Expr},
};
use strum::IntoEnumIterator;

const LOG_TOPIC_GAS: u64 = 375;
const LOG_BYTE_GAS: u64 = 8;

pub(super) fn register(table: &mut SemanticsTable) {
    table.register(Opcode::Pop, |s, _, _| {
        s.pop()?;
        Ok(Effect::Next)
    });
    table.register(Opcode::JumpDest, |_, _, _| Ok(Effect::Next));

    table.register(Opcode::Jump, |s, _, _| {
        let target = s.pop()?;
        Ok(Effect::Jump { target })
    });
    table.register(Opcode::JumpI, |s, _, _| {
        let [target, condition] = s.pop_n()?;
        Ok(Effect::Branch { target, condition })
    });

    table.register(Opcode::Push0, |s, _, _| push(s, Expr::from_u64(0)));

    Opcode::iter().for_each(|op| {
        if op.is_push() && op != Opcode::Push0 {
            table.register(op, push_immediate);
        } else if op.dup_depth().is_some() {
            table.register(op, dup);
        } else if op.swap_depth().is_some() {
            table.register(op, swap);
        } else if op.log_topics().is_some() {
            table.register(op, log);
        }
    });

    table.register(Opcode::Stop, |_, _, _| halt(Outcome::Stop, ReturnData::Empty));
    table.register(Opcode::Return, |s, _, _| {
        let output = region(s)?;
        halt(Outcome::Return, output)
    });
    table.register(Opcode::Revert, |s, _, _| {
        let output = region(s)?;
        halt(Outcome::Revert, output)
    });
    table.register(Opcode::Invalid, |_, _, _| Err(Fault::InvalidOpcode.into()));
    table.register(Opcode::SelfDestruct, |s, _, _| {
        static_guard(s)?;
        s.pop()?;
        halt(Outcome::SelfDestruct, ReturnData::Empty)
    });
}

fn push_immediate(
    state: &mut MachineState,
    instruction: &Instruction,
    _: &Env,
) -> Result<Effect, Outcome> {
    match instruction.arg {
        Some(value) => push(state, Expr::constant(value)),
        None => Err(Fault::InvalidOpcode.into()),
    }
}

fn dup(
    state: &mut MachineState,
    instruction: &Instruction,
    _: &Env,
) -> Result<Effect, Outcome> {
    let depth = instruction
        .opcode()
        .and_then(Opcode::dup_depth)
        .ok_or(Fault::InvalidOpcode)?;

    state.dup(depth)?;

    Ok(Effect::Next)
}

fn swap(
    state: &mut MachineState,
    instruction: &Instruction,
    _: &Env,
) -> Result<Effect, Outcome> {
    let depth = instruction
        .opcode()
        .and_then(Opcode::swap_depth)
        .ok_or(Fault::InvalidOpcode)?;

    state.swap(depth)?;

    Ok(Effect::Next)
}

/// Event data is not kept, only the topics.
fn log(
    state: &mut MachineState,
    instruction: &Instruction,
    _: &Env,
) -> Result<Effect, Outcome> {
    let count = instruction
        .opcode()
        .and_then(Opcode::log_topics)
        .ok_or(Fault::InvalidOpcode)?;

    static_guard(state)?;

    let [_offset, size] = state.pop_n()?;
    let topics = (0..count)
        .map(|_| state.pop())
        .collect::<Result<Vec<_>, _>>()?;

    let bytes = size.as_const().and_then(|s| word::to_u64(&s)).unwrap_or(0);
    state.charge(
        LOG_TOPIC_GAS
            .saturating_mul(count as u64)
            .saturating_add(LOG_BYTE_GAS.saturating_mul(bytes)),
    )?;

    state.record_event(topics);

    Ok(Effect::Next)
}

fn region(state: &mut MachineState) -> Result<ReturnData, Outcome> {
    let [offset, size] = state.pop_n()?;

    Ok(ReturnData::Region {
        memory: state.memory.clone(),
        offset,
        size,
    })
}

fn halt(outcome: Outcome, output: ReturnData) -> Result<Effect, Outcome> {
    Ok(Effect::Halt { outcome, output })
}

#[cfg(test)]
mod tests {
    use crate::engine::semantics::tests_support::*;
    use crate::{
        engine::{
            result::{Fault, Outcome},
            semantics::Effect,
        },
        program::Opcode,
        symbolic::Word,
    };

    #[test]
    fn dup_and_swap_use_their_depth() {
        let mut state = state_with(&[1, 2, 3]);

        dispatch(&mut state, Opcode::Dup3).expect("three values");
        assert_eq!(top(&state), Some(Word::from(1_u64)));

        dispatch(&mut state, Opcode::Swap2).expect("four values");
        assert_eq!(top(&state), Some(Word::from(2_u64)));

        assert_eq!(
            dispatch(&mut state, Opcode::Swap4).err(),
            Some(Outcome::Exception(Fault::StackUnderflow))
        );
    }

    #[test]
    fn conditional_jumps_report_target_and_condition() {
        // condition 1, target 0x10
        let mut state = state_with(&[1, 0x10]);

        match dispatch(&mut state, Opcode::JumpI) {
            Ok(Effect::Branch { target, condition }) => {
                assert_eq!(target.as_const(), Some(Word::from(0x10_u64)));
                assert_eq!(condition.as_const(), Some(Word::from(1_u64)));
            }
            other => panic!("expected a branch, got {:?}", other),
        }
    }

    #[test]
    fn invalid_is_an_exceptional_halt() {
        let mut state = state_with(&[]);

        assert_eq!(
            dispatch(&mut state, Opcode::Invalid).err(),
            Some(Outcome::Exception(Fault::InvalidOpcode))
        );
    }

    #[test]
    fn logs_charge_topics_and_data() {
        // topic 0xaa, size 2, offset 0
        let mut state = state_with(&[0xaa, 2, 0]);

        dispatch(&mut state, Opcode::Log1).expect("three values");

        assert_eq!(state.gas_used(), 375 + 16);
        assert_eq!(state.events().len(), 1);
        assert_eq!(state.stack_len(), 0);
    }
}
