use super::{charge_copy, push, static_guard, words, Effect, SemanticsTable};
use crate::{
    engine::{
        machine::{copy_words, MachineState, MAX_COPY_WORDS},
        result::Outcome,
    },
    program::Opcode,
    symbolic::{word, BinaryOp, Expr, SymbolicValue},
};
use std::sync::Arc;

const SHA3_WORD_GAS: u64 = 6;

pub(super) fn register(table: &mut SemanticsTable) {
    table.register(Opcode::MLoad, |s, _, _| {
        let offset = s.pop()?;
        let value = s.memory.load(&offset);
        push(s, value)
    });
    table.register(Opcode::MStore, |s, _, _| {
        let [offset, value] = s.pop_n()?;
        s.memory.store(offset, value);
        Ok(Effect::Next)
    });
    table.register(Opcode::MStore8, |s, _, _| {
        let [offset, value] = s.pop_n()?;
        s.memory.store_byte(offset, value);
        Ok(Effect::Next)
    });
    table.register(Opcode::MCopy, |s, _, _| mcopy(s));

    table.register(Opcode::SLoad, |s, _, _| {
        let slot = s.pop()?;
        let value = s.storage.load(&s.context.account, &slot);
        push(s, value)
    });
    table.register(Opcode::SStore, |s, _, _| {
        static_guard(s)?;
        let [slot, value] = s.pop_n()?;
        s.record_write(slot, value);
        Ok(Effect::Next)
    });
    table.register(Opcode::TLoad, |s, _, _| {
        let slot = s.pop()?;
        let value = s.transient.load(&s.context.account, &slot);
        push(s, value)
    });
    table.register(Opcode::TStore, |s, _, _| {
        static_guard(s)?;
        let [slot, value] = s.pop_n()?;
        let account = s.context.account.clone();
        s.transient.store(&account, slot, value);
        Ok(Effect::Next)
    });

    table.register(Opcode::Sha3, |s, _, _| sha3(s));
}

fn mcopy(state: &mut MachineState) -> Result<Effect, Outcome> {
    let [destination, source, size] = state.pop_n()?;
    charge_copy(state, &size)?;

    let snapshot = state.memory.clone();
    copy_words(&mut state.memory, &destination, &size, |delta| {
        snapshot.load(&Expr::binary(BinaryOp::Add, source.clone(), delta.clone()))
    });

    Ok(Effect::Next)
}

fn sha3(state: &mut MachineState) -> Result<Effect, Outcome> {
    let [offset, size] = state.pop_n()?;

    let count = words(&size).unwrap_or(1);
    state.charge(SHA3_WORD_GAS.saturating_mul(count))?;

    let load = |state: &MachineState, k: u64| {
        state.memory.load(&Expr::binary(
            BinaryOp::Add,
            offset.clone(),
            Expr::from_u64(k * 32),
        ))
    };

    let length = size
        .as_const()
        .and_then(|s| word::to_u64(&s))
        .filter(|_| count <= MAX_COPY_WORDS);

    let hash = match length {
        Some(length) => {
            let input = (0..count).map(|k| load(state, k)).collect::<Vec<_>>();

            let concrete = input
                .iter()
                .map(|w| w.as_const())
                .collect::<Option<Vec<_>>>();

            match concrete {
                Some(words) => Expr::constant(word::keccak_prefix(&words, length as usize)),
                None if length % 32 == 0 => Expr::keccak(input),
                None => hash_of(input, size),
            }
        }
        // unknown or oversized input is summarized by its first word and length
        None => hash_of(vec![load(state, 0)], size),
    };

    push(state, hash)
}

fn hash_of(mut input: Vec<SymbolicValue>, size: SymbolicValue) -> SymbolicValue {
    input.push(size);

    Arc::new(Expr::Keccak(input))
}

#[cfg(test)]
mod tests {
    use crate::engine::semantics::tests_support::*;
    use crate::{
        engine::result::{Fault, Outcome},
        program::Opcode,
        symbolic::{word, Expr, Word},
    };

    #[test]
    fn stored_words_are_loaded_back() {
        // value 0x2a at offset 0x40
        let mut state = state_with(&[0x2a, 0x40]);
        dispatch(&mut state, Opcode::MStore).expect("two operands");

        state.push(Expr::from_u64(0x40)).expect("room");
        dispatch(&mut state, Opcode::MLoad).expect("one operand");

        assert_eq!(top(&state), Some(Word::from(0x2a_u64)));
    }

    #[test]
    fn storage_writes_are_recorded() {
        let mut state = state_with(&[7, 1]);

        dispatch(&mut state, Opcode::SStore).expect("two operands");

        assert_eq!(state.writes().len(), 1);
        assert_eq!(state.writes()[0].value, Expr::from_u64(7));

        state.push(Expr::from_u64(1)).expect("room");
        dispatch(&mut state, Opcode::SLoad).expect("one operand");
        assert_eq!(top(&state), Some(Word::from(7_u64)));
    }

    #[test]
    fn static_frames_reject_storage_writes() {
        let mut state = state_with(&[7, 1]);
        state.context.is_static = true;

        assert_eq!(
            dispatch(&mut state, Opcode::SStore).err(),
            Some(Outcome::Exception(Fault::StaticStateChange))
        );
        assert!(state.writes().is_empty());
    }

    #[test]
    fn concrete_memory_hashes_fold() {
        let mut state = state_with(&[]);
        state.push(Expr::constant(Word::MAX)).expect("room");
        state.push(Expr::from_u64(0)).expect("room");
        dispatch(&mut state, Opcode::MStore).expect("two operands");

        // one byte at offset 0
        state.push(Expr::from_u64(1)).expect("room");
        state.push(Expr::from_u64(0)).expect("room");
        dispatch(&mut state, Opcode::Sha3).expect("two operands");

        assert_eq!(top(&state), Some(word::keccak_prefix(&[Word::MAX], 1)));
        assert_eq!(state.gas_used(), 6);
    }

    #[test]
    fn partially_written_words_hash_symbolically() {
        let mut state = state_with(&[0xff, 0]);
        dispatch(&mut state, Opcode::MStore8).expect("two operands");

        state.push(Expr::from_u64(1)).expect("room");
        state.push(Expr::from_u64(0)).expect("room");
        dispatch(&mut state, Opcode::Sha3).expect("two operands");

        assert!(top(&state).is_none());
    }
}
