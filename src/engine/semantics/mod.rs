//! Opcode semantics as a fixed dispatch table.
//!
//! Each handler transforms the machine state of one path and tells the
//! explorer how control continues. Path-local faults and cutoffs are returned
//! as `Err(Outcome)`. Static gas is charged by the explorer before dispatch,
//! handlers only charge operand dependent costs.

mod arithmetic;
mod calls;
mod context;
mod control;
mod storage;

use super::{
    machine::{MachineState, ReturnData},
    result::{Fault, Outcome},
    Env,
};
use crate::{
    program::{Instruction, Opcode},
    symbolic::{word, SymbolicValue, Word},
};
use strum::IntoEnumIterator;

pub type Handler = fn(&mut MachineState, &Instruction, &Env) -> Result<Effect, Outcome>;

#[derive(Clone, Debug)]
pub enum Effect {
    /// Continue with the next instruction of the block.
    Next,
    Jump {
        target: SymbolicValue,
    },
    Branch {
        target: SymbolicValue,
        condition: SymbolicValue,
    },
    /// Control moved into a nested call frame.
    Enter,
    /// The current frame halted.
    Halt {
        outcome: Outcome,
        output: ReturnData,
    },
}

pub struct SemanticsTable {
    handlers: [Option<Handler>; 256],
}

impl Default for SemanticsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SemanticsTable {
    pub fn new() -> Self {
        let mut table = Self {
            handlers: [None; 256],
        };

        arithmetic::register(&mut table);
        context::register(&mut table);
        storage::register(&mut table);
        control::register(&mut table);
        calls::register(&mut table);

        table
    }

    /// An empty table. Handlers are added with `register`.
    pub fn empty() -> Self {
        Self {
            handlers: [None; 256],
        }
    }

    pub fn register(&mut self, op: Opcode, handler: Handler) {
        self.handlers[op.byte() as usize] = Some(handler);
    }

    pub fn handler(&self, op: Opcode) -> Option<Handler> {
        self.handlers[op.byte() as usize]
    }

    /// Checks that every opcode of the instruction set has a handler.
    pub fn validate(&self) -> Result<(), Opcode> {
        match Opcode::iter().find(|op| self.handler(*op).is_none()) {
            Some(missing) => Err(missing),
            None => Ok(()),
        }
    }

    pub fn dispatch(
        &self,
        state: &mut MachineState,
        instruction: &Instruction,
        env: &Env,
    ) -> Result<Effect, Outcome> {
        match instruction.opcode().and_then(|op| self.handler(op)) {
            Some(handler) => handler(state, instruction, env),
            None => Err(Fault::InvalidOpcode.into()),
        }
    }
}

/// Number of 32 byte words needed for `size` bytes, if concrete.
fn words(size: &SymbolicValue) -> Option<u64> {
    size.as_const()
        .map(|s| word::to_u64(&s).map_or(u64::MAX / 32, |s| s.div_ceil(32)))
}

/// Byte length of a word, used by EXP gas.
fn byte_len(value: &Word) -> u64 {
    value.byte_len() as u64
}

const COPY_WORD_GAS: u64 = 3;

/// Copy instructions pay per word. A symbolic size pays for the single word copied.
fn charge_copy(state: &mut MachineState, size: &SymbolicValue) -> Result<(), Outcome> {
    let count = words(size).unwrap_or(1);

    state.charge(COPY_WORD_GAS.saturating_mul(count))
}

fn static_guard(state: &MachineState) -> Result<(), Outcome> {
    if state.context.is_static {
        Err(Fault::StaticStateChange.into())
    } else {
        Ok(())
    }
}

fn push(state: &mut MachineState, value: SymbolicValue) -> Result<Effect, Outcome> {
    state.push(value)?;

    Ok(Effect::Next)
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::{
        config::Config,
        engine::machine::{CallData, Context},
        symbolic::Expr,
    };
    use std::sync::Arc;

    pub fn context() -> Context {
        Context {
            contract: 0,
            code: Arc::from("Token"),
            account: Arc::from("Token"),
            address: Expr::input("address[Token]"),
            caller: Expr::input("caller"),
            value: Expr::input("callvalue"),
            calldata: CallData::Input,
            is_static: false,
        }
    }

    /// State whose stack holds `values`, the last one on top.
    pub fn state_with(values: &[u64]) -> MachineState {
        let mut state = MachineState::new(context(), 0, u64::MAX);

        values
            .iter()
            .for_each(|v| state.push(Expr::from_u64(*v)).expect("room on the stack"));

        state
    }

    pub fn dispatch(state: &mut MachineState, op: Opcode) -> Result<Effect, Outcome> {
        dispatch_with(state, op, |config| config)
    }

    pub fn dispatch_with<F>(
        state: &mut MachineState,
        op: Opcode,
        configure: F,
    ) -> Result<Effect, Outcome>
    where
        F: FnOnce(Config) -> Config,
    {
        let env = Env::new(vec![], configure(Config::for_tests()));

        env.table.dispatch(state, &Instruction::new(0, op), &env)
    }

    pub fn top(state: &MachineState) -> Option<Word> {
        state.top().and_then(|v| v.as_const())
    }
}
