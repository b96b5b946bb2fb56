//! Message calls and contract creation.
//!
//! A call whose target resolves to a contract of the analyzed set executes
//! nested in the same path. Any other call is modeled by fresh inputs for its
//! success flag and return data.

use super::{push, static_guard, Effect, SemanticsTable};
use crate::{
    engine::{
        machine::{copy_words, CallData, Context, MachineState, NestedCall, ReturnData},
        result::{Bound, CallRecord, Fault, Outcome},
        Env,
    },
    program::{Instruction, Opcode},
    symbolic::{Expr, SymbolicValue},
};
use std::sync::Arc;

pub(super) fn register(table: &mut SemanticsTable) {
    table.register(Opcode::Call, call);
    table.register(Opcode::CallCode, call);
    table.register(Opcode::DelegateCall, call);
    table.register(Opcode::StaticCall, call);
    table.register(Opcode::Create, create);
    table.register(Opcode::Create2, create);
}

struct Arguments {
    target: SymbolicValue,
    value: SymbolicValue,
    args_offset: SymbolicValue,
    args_size: SymbolicValue,
    ret_offset: SymbolicValue,
    ret_size: SymbolicValue,
}

fn arguments(state: &mut MachineState, kind: Opcode) -> Result<Arguments, Fault> {
    match kind {
        Opcode::Call | Opcode::CallCode => {
            let [_gas, target, value, args_offset, args_size, ret_offset, ret_size] =
                state.pop_n()?;

            Ok(Arguments {
                target,
                value,
                args_offset,
                args_size,
                ret_offset,
                ret_size,
            })
        }
        _ => {
            let [_gas, target, args_offset, args_size, ret_offset, ret_size] = state.pop_n()?;

            let value = match kind {
                Opcode::DelegateCall => state.context.value.clone(),
                _ => Expr::from_u64(0),
            };

            Ok(Arguments {
                target,
                value,
                args_offset,
                args_size,
                ret_offset,
                ret_size,
            })
        }
    }
}

fn call(
    state: &mut MachineState,
    instruction: &Instruction,
    env: &Env,
) -> Result<Effect, Outcome> {
    let kind = instruction.opcode().ok_or(Fault::InvalidOpcode)?;
    let args = arguments(state, kind)?;

    // a symbolic value in a static frame is assumed to be zero
    let transfers = args.value.as_const().is_some_and(|v| !v.is_zero());
    if kind == Opcode::Call && transfers {
        static_guard(state)?;
    }

    if state.call_depth() as u64 >= env.config.call_depth_limit {
        return Err(Bound::CallDepth.into());
    }

    let callee = env.resolve(&args.target);

    state.record_call(CallRecord {
        kind,
        caller: state.context.account.clone(),
        target: args.target.clone(),
        value: args.value.clone(),
        modeled: callee.is_some(),
    });

    match callee {
        Some(index) => enter(state, env, kind, index, args),
        None => model(state, args),
    }
}

fn enter(
    state: &mut MachineState,
    env: &Env,
    kind: Opcode,
    index: usize,
    args: Arguments,
) -> Result<Effect, Outcome> {
    let callee = env.contract(index);
    let entry = callee.entry();

    if !state.may_enter(index, entry, env.config.loop_limit) {
        return Err(Bound::Loop.into());
    }

    let name: Arc<str> = Arc::from(callee.name());
    let current = &state.context;

    let calldata = CallData::Region {
        memory: state.memory.clone(),
        offset: args.args_offset,
        size: args.args_size,
    };

    let context = match kind {
        Opcode::DelegateCall => Context {
            contract: index,
            code: name,
            calldata,
            ..current.clone()
        },
        Opcode::CallCode => Context {
            contract: index,
            code: name,
            caller: current.address.clone(),
            value: args.value,
            calldata,
            ..current.clone()
        },
        _ => Context {
            contract: index,
            code: name.clone(),
            account: name,
            address: args.target,
            caller: current.address.clone(),
            value: args.value,
            calldata,
            is_static: current.is_static || kind == Opcode::StaticCall,
        },
    };

    state.enter_call(NestedCall {
        context,
        entry,
        ret_offset: args.ret_offset,
        ret_size: args.ret_size,
    });

    Ok(Effect::Enter)
}

fn model(state: &mut MachineState, args: Arguments) -> Result<Effect, Outcome> {
    let n = state.fresh_id();

    let output = ReturnData::Input(Arc::from(format!("call{}.returndata", n)));
    copy_words(&mut state.memory, &args.ret_offset, &args.ret_size, |delta| {
        output.load(delta)
    });
    state.return_data = output;

    push(
        state,
        Expr::is_non_zero(Expr::input(format!("call{}.success", n))),
    )
}

fn create(
    state: &mut MachineState,
    instruction: &Instruction,
    env: &Env,
) -> Result<Effect, Outcome> {
    let kind = instruction.opcode().ok_or(Fault::InvalidOpcode)?;

    static_guard(state)?;

    let value = match kind {
        Opcode::Create2 => {
            let [value, _offset, _size, _salt] = state.pop_n()?;
            value
        }
        _ => {
            let [value, _offset, _size] = state.pop_n()?;
            value
        }
    };

    if state.call_depth() as u64 >= env.config.call_depth_limit {
        return Err(Bound::CallDepth.into());
    }

    let n = state.fresh_id();
    let address = Expr::input(format!("create{}.address", n));

    state.record_call(CallRecord {
        kind,
        caller: state.context.account.clone(),
        target: address.clone(),
        value,
        modeled: false,
    });
    state.return_data = ReturnData::Empty;

    push(state, address)
}

#[cfg(test)]
mod tests {
    use crate::engine::semantics::tests_support::*;
    use crate::{
        engine::result::{Bound, Fault, Outcome},
        program::Opcode,
        symbolic::Expr,
    };

    #[test]
    fn unknown_callees_are_modeled_by_inputs() {
        // ret size 32, ret offset 0, args size 0, args offset 0, value 0, target 0xbeef, gas 0
        let mut state = state_with(&[32, 0, 0, 0, 0, 0xbeef, 0]);

        dispatch(&mut state, Opcode::Call).expect("seven operands");

        assert_eq!(
            state.pop().expect("success flag").to_string(),
            "(iszero (iszero call0.success))"
        );
        assert_eq!(
            state.memory.load(&Expr::from_u64(0)).to_string(),
            "call0.returndata[0x0]"
        );
        assert_eq!(state.calls().len(), 1);
        assert!(!state.calls()[0].modeled);
    }

    #[test]
    fn value_transfers_in_static_frames_fail() {
        let mut state = state_with(&[0, 0, 0, 0, 1, 0xbeef, 0]);
        state.context.is_static = true;

        assert_eq!(
            dispatch(&mut state, Opcode::Call).err(),
            Some(Outcome::Exception(Fault::StaticStateChange))
        );
    }

    #[test]
    fn calls_beyond_the_depth_limit_are_cut_off() {
        let mut state = state_with(&[0, 0, 0, 0, 0, 0xbeef, 0]);

        assert_eq!(
            dispatch_with(&mut state, Opcode::StaticCall, |config| config
                .with_call_depth_limit(0))
            .err(),
            Some(Outcome::Cutoff(Bound::CallDepth))
        );
    }
}
