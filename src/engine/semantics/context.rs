use super::{charge_copy, push, Effect, SemanticsTable};
use crate::{
    engine::{
        machine::{copy_words, MachineState},
        result::Outcome,
        Env,
    },
    program::Opcode,
    symbolic::{BinaryOp, Expr, SymbolicValue},
};

pub(super) fn register(table: &mut SemanticsTable) {
    table.register(Opcode::Address, |s, _, _| {
        let address = s.context.address.clone();
        push(s, address)
    });
    table.register(Opcode::Caller, |s, _, _| {
        let caller = s.context.caller.clone();
        push(s, caller)
    });
    table.register(Opcode::CallValue, |s, _, _| {
        let value = s.context.value.clone();
        push(s, value)
    });

    table.register(Opcode::Origin, |s, _, _| block_input(s, "origin"));
    table.register(Opcode::GasPrice, |s, _, _| block_input(s, "gasprice"));
    table.register(Opcode::Coinbase, |s, _, _| block_input(s, "coinbase"));
    table.register(Opcode::Timestamp, |s, _, _| block_input(s, "timestamp"));
    table.register(Opcode::Number, |s, _, _| block_input(s, "number"));
    table.register(Opcode::PrevRandao, |s, _, _| block_input(s, "prevrandao"));
    table.register(Opcode::GasLimit, |s, _, _| block_input(s, "gaslimit"));
    table.register(Opcode::ChainId, |s, _, _| block_input(s, "chainid"));
    table.register(Opcode::BaseFee, |s, _, _| block_input(s, "basefee"));
    table.register(Opcode::BlobBaseFee, |s, _, _| block_input(s, "blobbasefee"));

    table.register(Opcode::Balance, |s, _, _| {
        let account = s.pop()?;
        push(s, Expr::input(format!("balance[{}]", account)))
    });
    table.register(Opcode::SelfBalance, |s, _, _| {
        let name = format!("balance[{}]", s.context.address);
        push(s, Expr::input(name))
    });
    table.register(Opcode::BlockHash, |s, _, _| {
        let number = s.pop()?;
        push(s, Expr::input(format!("blockhash[{}]", number)))
    });
    table.register(Opcode::BlobHash, |s, _, _| {
        let index = s.pop()?;
        push(s, Expr::input(format!("blobhash[{}]", index)))
    });

    table.register(Opcode::CallDataLoad, |s, _, _| {
        let offset = s.pop()?;
        let value = s.context.calldata.load(&offset);
        push(s, value)
    });
    table.register(Opcode::CallDataSize, |s, _, _| {
        let size = s.context.calldata.size();
        push(s, size)
    });
    table.register(Opcode::CallDataCopy, |s, _, _| calldata_copy(s));

    table.register(Opcode::CodeSize, |s, _, env| {
        let size = code_size(env, Some(s.context.contract), &s.context.address);
        push(s, size)
    });
    table.register(Opcode::CodeCopy, |s, _, env| {
        let [destination, offset, size] = s.pop_n()?;
        let code = env.contract(s.context.contract).name().to_string();

        code_copy(s, &code, destination, offset, size)
    });
    table.register(Opcode::ExtCodeSize, |s, _, env| {
        let address = s.pop()?;
        push(s, code_size(env, env.resolve(&address), &address))
    });
    table.register(Opcode::ExtCodeCopy, |s, _, env| {
        let [address, destination, offset, size] = s.pop_n()?;
        let code = match env.resolve(&address) {
            Some(index) => env.contract(index).name().to_string(),
            None => address.to_string(),
        };

        code_copy(s, &code, destination, offset, size)
    });
    table.register(Opcode::ExtCodeHash, |s, _, env| {
        let address = s.pop()?;
        let hash = env
            .resolve(&address)
            .and_then(|index| env.contract(index).program().bytecode_hash)
            .map_or_else(
                || Expr::input(format!("extcodehash[{}]", address)),
                Expr::constant,
            );

        push(s, hash)
    });

    table.register(Opcode::ReturnDataSize, |s, _, _| {
        let size = s.return_data.size();
        push(s, size)
    });
    table.register(Opcode::ReturnDataCopy, |s, _, _| returndata_copy(s));

    table.register(Opcode::Pc, |s, instruction, _| {
        push(s, Expr::from_u64(instruction.pc))
    });
    table.register(Opcode::MSize, |s, _, _| {
        let size = match s.memory.size() {
            Some(size) => Expr::from_u64(size),
            None => {
                let n = s.fresh_id();
                Expr::input(format!("msize{}", n))
            }
        };

        push(s, size)
    });
    table.register(Opcode::Gas, |s, _, _| {
        let remaining = Expr::from_u64(s.gas_remaining());
        push(s, remaining)
    });
}

fn block_input(state: &mut MachineState, name: &str) -> Result<Effect, Outcome> {
    push(state, Expr::input(name))
}

fn code_size(env: &Env, contract: Option<usize>, address: &SymbolicValue) -> SymbolicValue {
    contract
        .and_then(|index| env.contract(index).program().code_size)
        .map_or_else(
            || Expr::input(format!("extcodesize[{}]", address)),
            Expr::from_u64,
        )
}

fn calldata_copy(state: &mut MachineState) -> Result<Effect, Outcome> {
    let [destination, offset, size] = state.pop_n()?;
    charge_copy(state, &size)?;

    let calldata = state.context.calldata.clone();
    copy_words(&mut state.memory, &destination, &size, |delta| {
        calldata.load(&Expr::binary(BinaryOp::Add, offset.clone(), delta.clone()))
    });

    Ok(Effect::Next)
}

fn returndata_copy(state: &mut MachineState) -> Result<Effect, Outcome> {
    let [destination, offset, size] = state.pop_n()?;
    charge_copy(state, &size)?;

    let return_data = state.return_data.clone();
    copy_words(&mut state.memory, &destination, &size, |delta| {
        return_data.load(&Expr::binary(BinaryOp::Add, offset.clone(), delta.clone()))
    });

    Ok(Effect::Next)
}

/// Code bytes are not part of the decompiled program, they are read as inputs.
fn code_copy(
    state: &mut MachineState,
    code: &str,
    destination: SymbolicValue,
    offset: SymbolicValue,
    size: SymbolicValue,
) -> Result<Effect, Outcome> {
    charge_copy(state, &size)?;

    copy_words(&mut state.memory, &destination, &size, |delta| {
        let at = Expr::binary(BinaryOp::Add, offset.clone(), delta.clone());
        Expr::input(format!("code[{}][{}]", code, at))
    });

    Ok(Effect::Next)
}

#[cfg(test)]
mod tests {
    use crate::engine::semantics::tests_support::*;
    use crate::{program::Opcode, symbolic::Word};

    #[test]
    fn calldata_is_read_as_named_inputs() {
        let mut state = state_with(&[4]);

        dispatch(&mut state, Opcode::CallDataLoad).expect("one operand");

        assert_eq!(
            state.pop().expect("result").to_string(),
            "calldata[0x4]".to_string()
        );
    }

    #[test]
    fn copies_are_charged_per_word() {
        // size 64, offset 0, destination 0
        let mut state = state_with(&[64, 0, 0]);

        dispatch(&mut state, Opcode::CallDataCopy).expect("three operands");

        assert_eq!(state.gas_used(), 6);
        assert_eq!(state.memory.size(), Some(64));
    }

    #[test]
    fn memory_size_follows_concrete_writes() {
        let mut state = state_with(&[]);

        dispatch(&mut state, Opcode::MSize).expect("no operands");

        assert_eq!(top(&state), Some(Word::ZERO));
    }
}
