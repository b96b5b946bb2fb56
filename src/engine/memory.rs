//! Word-addressed memory and storage.
//!
//! Both are ordered write logs. A read walks the log from the newest write to
//! the oldest and builds `ite(addr == w.addr, w.value, <older>)` for every
//! write whose address may alias the read address. The chain stops at the
//! first write to a structurally equal address, or bottoms out in a named
//! fresh input (or zero where the EVM guarantees zero initialization). Writes
//! to two different concrete addresses never alias.
//!
//! This single policy is used for memory, storage and transient storage.

use super::persistent::{Chain, PersistentMap};
use crate::symbolic::{BinaryOp, Expr, SymbolicValue, TernaryOp, Word};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct WriteLog {
    writes: Chain<(SymbolicValue, SymbolicValue)>,
}

impl WriteLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Older writes to the same address stay in the log but are never read again.
    pub fn write(&mut self, address: SymbolicValue, value: SymbolicValue) {
        self.writes.push((address, value));
    }

    pub fn read<F>(&self, address: &SymbolicValue, unwritten: F) -> SymbolicValue
    where
        F: FnOnce() -> SymbolicValue,
    {
        let mut aliases = Vec::new();
        let mut base = None;

        for (a, v) in self.writes.iter() {
            if a == address {
                base = Some(v.clone());
                break;
            }

            if let (Some(x), Some(y)) = (a.as_const(), address.as_const()) {
                if x != y {
                    continue;
                }
            }

            aliases.push((a, v));
        }

        let base = base.unwrap_or_else(unwritten);

        aliases.into_iter().rev().fold(base, |older, (a, v)| {
            Expr::ternary(
                TernaryOp::Ite,
                Expr::eq(address.clone(), a.clone()),
                v.clone(),
                older,
            )
        })
    }

    /// Writes from newest to oldest, shadowed writes included.
    pub fn iter(&self) -> impl Iterator<Item = &(SymbolicValue, SymbolicValue)> {
        self.writes.iter()
    }
}

#[derive(Clone, Debug)]
pub struct Memory {
    label: Arc<str>,
    log: WriteLog,
    /// Highest concretely written byte, `None` once a symbolic offset was written.
    extent: Option<u64>,
}

impl Memory {
    pub fn new<S: AsRef<str>>(label: S) -> Self {
        Self {
            label: Arc::from(label.as_ref()),
            log: WriteLog::new(),
            extent: Some(0),
        }
    }

    pub fn load(&self, offset: &SymbolicValue) -> SymbolicValue {
        self.log
            .read(offset, || Expr::input(format!("{}[{}]", self.label, offset)))
    }

    pub fn store(&mut self, offset: SymbolicValue, value: SymbolicValue) {
        self.extent = match (self.extent, offset.as_const().and_then(|o| to_u64(&o))) {
            (Some(extent), Some(o)) => Some(extent.max(o.saturating_add(32))),
            _ => None,
        };

        self.log.write(offset, value);
    }

    /// MSTORE8 replaces the most significant byte of the word at `offset`.
    pub fn store_byte(&mut self, offset: SymbolicValue, value: SymbolicValue) {
        let word = self.load(&offset);

        let top_byte = Word::from(0xff_u64) << 248_usize;
        let kept = Expr::binary(BinaryOp::And, Expr::constant(!top_byte), word);
        let byte = Expr::binary(
            BinaryOp::Shl,
            Expr::from_u64(248),
            Expr::binary(BinaryOp::And, Expr::from_u64(0xff), value),
        );

        self.store(offset, Expr::binary(BinaryOp::Or, kept, byte));
    }

    /// MSIZE, rounded up to whole words.
    pub fn size(&self) -> Option<u64> {
        self.extent.map(|e| e.div_ceil(32) * 32)
    }
}

fn to_u64(w: &Word) -> Option<u64> {
    crate::symbolic::word::to_u64(w)
}

/// Per-account slot maps, keyed by contract name.
#[derive(Clone, Debug)]
pub struct Storage {
    label: &'static str,
    zero_initialized: bool,
    accounts: PersistentMap<Arc<str>, WriteLog>,
}

impl Storage {
    /// Unwritten slots hold unknown pre-state.
    pub fn persistent() -> Self {
        Self {
            label: "storage",
            zero_initialized: false,
            accounts: PersistentMap::new(),
        }
    }

    /// Unwritten slots are zero.
    pub fn transient() -> Self {
        Self {
            label: "transient",
            zero_initialized: true,
            accounts: PersistentMap::new(),
        }
    }

    pub fn load(&self, account: &Arc<str>, slot: &SymbolicValue) -> SymbolicValue {
        let unwritten = || {
            if self.zero_initialized {
                Expr::from_u64(0)
            } else {
                Expr::input(format!("{}[{}][{}]", self.label, account, slot))
            }
        };

        match self.accounts.get(account) {
            Some(log) => log.read(slot, unwritten),
            None => unwritten(),
        }
    }

    pub fn store(&mut self, account: &Arc<str>, slot: SymbolicValue, value: SymbolicValue) {
        let mut log = self.accounts.get(account).cloned().unwrap_or_default();
        log.write(slot, value);

        self.accounts.insert(account.clone(), log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::{Assignment, Evaluator};

    #[test]
    fn concrete_writes_shadow_older_ones() {
        let mut memory = Memory::new("memory");
        memory.store(Expr::from_u64(0x40), Expr::from_u64(1));
        memory.store(Expr::from_u64(0x60), Expr::from_u64(2));
        memory.store(Expr::from_u64(0x40), Expr::from_u64(3));

        assert_eq!(memory.load(&Expr::from_u64(0x40)), Expr::from_u64(3));
        assert_eq!(memory.load(&Expr::from_u64(0x60)), Expr::from_u64(2));
        assert_eq!(memory.size(), Some(0x80));
    }

    #[test]
    fn unwritten_reads_are_named_inputs() {
        let storage = Storage::persistent();
        let account = Arc::from("Token");

        assert_eq!(
            storage.load(&account, &Expr::from_u64(1)).to_string(),
            "storage[Token][0x1]"
        );
        assert_eq!(
            Storage::transient().load(&account, &Expr::from_u64(1)),
            Expr::from_u64(0)
        );
    }

    #[test]
    fn symbolic_reads_are_guarded_by_address_equality() {
        let account: Arc<str> = Arc::from("Token");
        let mut storage = Storage::persistent();
        storage.store(&account, Expr::from_u64(1), Expr::from_u64(10));
        storage.store(&account, Expr::from_u64(2), Expr::from_u64(20));

        let slot = Expr::input("slot");
        let value = storage.load(&account, &slot);

        let mut assignment = Assignment::new();
        assignment.insert(Arc::from("slot"), Word::from(1_u64));
        assert_eq!(Evaluator::new(&assignment).eval(&value), Word::from(10_u64));

        assignment.insert(Arc::from("slot"), Word::from(2_u64));
        assert_eq!(Evaluator::new(&assignment).eval(&value), Word::from(20_u64));
    }

    #[test]
    fn byte_stores_replace_the_top_byte() {
        let mut memory = Memory::new("memory");
        memory.store(Expr::from_u64(0), Expr::from_u64(0x1234));
        memory.store_byte(Expr::from_u64(0), Expr::from_u64(0xab));

        let expected = (Word::from(0xab_u64) << 248_usize) | Word::from(0x1234_u64);
        assert_eq!(memory.load(&Expr::from_u64(0)).as_const(), Some(expected));
    }
}
