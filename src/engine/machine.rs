//! Symbolic EVM machine state of a single path.
//!
//! Every growing part of the state is a persistent collection, so cloning a
//! state is O(1) and a fork copies nothing its siblings can observe.

use super::{
    memory::{Memory, Storage},
    persistent::{Chain, PersistentMap},
    result::{Bound, CallRecord, EventRecord, Fault, Outcome, StorageWrite},
};
use crate::{
    program::BlockId,
    symbolic::{BinaryOp, Expr, SymbolicValue},
};
use std::sync::Arc;

pub const STACK_LIMIT: usize = 1024;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Location {
    /// Index of the executing contract in the environment.
    pub contract: usize,
    pub block: BlockId,
    /// Next instruction within the block.
    pub index: usize,
}

#[derive(Clone, Debug)]
pub enum CallData {
    /// Transaction calldata, fully unconstrained.
    Input,
    /// Arguments of a nested call, read from the caller's memory.
    Region {
        memory: Memory,
        offset: SymbolicValue,
        size: SymbolicValue,
    },
}

impl CallData {
    pub fn load(&self, offset: &SymbolicValue) -> SymbolicValue {
        match self {
            CallData::Input => Expr::input(format!("calldata[{}]", offset)),
            CallData::Region {
                memory, offset: o, ..
            } => memory.load(&Expr::binary(BinaryOp::Add, o.clone(), offset.clone())),
        }
    }

    pub fn size(&self) -> SymbolicValue {
        match self {
            CallData::Input => Expr::input("calldatasize"),
            CallData::Region { size, .. } => size.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ReturnData {
    Empty,
    /// Output of a call without callee model.
    Input(Arc<str>),
    /// Output of a nested call, read from the callee's final memory.
    Region {
        memory: Memory,
        offset: SymbolicValue,
        size: SymbolicValue,
    },
}

impl ReturnData {
    pub fn load(&self, offset: &SymbolicValue) -> SymbolicValue {
        match self {
            ReturnData::Empty => Expr::from_u64(0),
            ReturnData::Input(prefix) => Expr::input(format!("{}[{}]", prefix, offset)),
            ReturnData::Region {
                memory, offset: o, ..
            } => memory.load(&Expr::binary(BinaryOp::Add, o.clone(), offset.clone())),
        }
    }

    pub fn size(&self) -> SymbolicValue {
        match self {
            ReturnData::Empty => Expr::from_u64(0),
            ReturnData::Input(prefix) => Expr::input(format!("{}.size", prefix)),
            ReturnData::Region { size, .. } => size.clone(),
        }
    }
}

/// Execution context of the current call frame.
#[derive(Clone, Debug)]
pub struct Context {
    pub contract: usize,
    /// Contract whose code executes.
    pub code: Arc<str>,
    /// Contract whose storage is accessed. Differs from `code` under DELEGATECALL.
    pub account: Arc<str>,
    pub address: SymbolicValue,
    pub caller: SymbolicValue,
    pub value: SymbolicValue,
    pub calldata: CallData,
    pub is_static: bool,
}

/// Caller state saved while a nested call executes.
#[derive(Clone, Debug)]
struct CallFrame {
    resume: Location,
    stack: Chain<SymbolicValue>,
    memory: Memory,
    context: Context,
    storage: Storage,
    transient: Storage,
    writes: Chain<StorageWrite>,
    events: Chain<EventRecord>,
    ret_offset: SymbolicValue,
    ret_size: SymbolicValue,
}

/// Callee side of a nested call, prepared by the call semantics.
pub struct NestedCall {
    pub context: Context,
    pub entry: BlockId,
    pub ret_offset: SymbolicValue,
    pub ret_size: SymbolicValue,
}

#[derive(Clone, Debug)]
pub struct MachineState {
    pub location: Location,
    stack: Chain<SymbolicValue>,
    pub memory: Memory,
    pub storage: Storage,
    pub transient: Storage,
    pub context: Context,
    pub return_data: ReturnData,
    frames: Chain<CallFrame>,
    gas_used: u64,
    gas_limit: u64,
    steps: u64,
    visits: PersistentMap<(usize, BlockId), u64>,
    trace: Chain<BlockId>,
    writes: Chain<StorageWrite>,
    calls: Chain<CallRecord>,
    events: Chain<EventRecord>,
    fresh: u64,
}

impl MachineState {
    /// State at the entry of a top-level transaction into `context`.
    pub fn new(context: Context, entry: BlockId, gas_limit: u64) -> Self {
        Self {
            location: Location {
                contract: context.contract,
                block: entry,
                index: 0,
            },
            stack: Chain::new(),
            memory: Memory::new("memory"),
            storage: Storage::persistent(),
            transient: Storage::transient(),
            context,
            return_data: ReturnData::Empty,
            frames: Chain::new(),
            gas_used: 0,
            gas_limit,
            steps: 0,
            visits: PersistentMap::new(),
            trace: Chain::new(),
            writes: Chain::new(),
            calls: Chain::new(),
            events: Chain::new(),
            fresh: 0,
        }
    }

    pub fn push(&mut self, value: SymbolicValue) -> Result<(), Fault> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(Fault::StackOverflow);
        }

        self.stack.push(value);

        Ok(())
    }

    pub fn pop(&mut self) -> Result<SymbolicValue, Fault> {
        self.stack.pop().ok_or(Fault::StackUnderflow)
    }

    /// The top of the stack comes first.
    pub fn pop_n<const N: usize>(&mut self) -> Result<[SymbolicValue; N], Fault> {
        if self.stack.len() < N {
            return Err(Fault::StackUnderflow);
        }

        let stack = &mut self.stack;
        Ok(std::array::from_fn(|_| {
            stack.pop().expect("stack holds at least N values")
        }))
    }

    /// Copies the `depth`-th value (1 = top) onto the stack.
    pub fn dup(&mut self, depth: usize) -> Result<(), Fault> {
        let value = match depth.checked_sub(1).and_then(|n| self.stack.iter().nth(n)) {
            Some(value) => value.clone(),
            None => return Err(Fault::StackUnderflow),
        };

        self.push(value)
    }

    /// Exchanges the top with the value `depth` positions below it.
    pub fn swap(&mut self, depth: usize) -> Result<(), Fault> {
        if self.stack.len() <= depth {
            return Err(Fault::StackUnderflow);
        }

        let mut values = (0..=depth)
            .map(|_| self.stack.pop().ok_or(Fault::StackUnderflow))
            .collect::<Result<Vec<_>, _>>()?;
        values.swap(0, depth);

        values
            .into_iter()
            .rev()
            .for_each(|value| self.stack.push(value));

        Ok(())
    }

    pub fn top(&self) -> Option<&SymbolicValue> {
        self.stack.peek()
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Consumes `gas`, or cuts the path off without consuming anything.
    pub fn charge(&mut self, gas: u64) -> Result<(), Outcome> {
        match self.gas_used.checked_add(gas) {
            Some(used) if used <= self.gas_limit => {
                self.gas_used = used;
                Ok(())
            }
            _ => Err(Outcome::Cutoff(Bound::Gas)),
        }
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn gas_remaining(&self) -> u64 {
        self.gas_limit - self.gas_used
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn count_step(&mut self) {
        self.steps += 1;
    }

    pub fn visits(&self, contract: usize, block: BlockId) -> u64 {
        self.visits.get(&(contract, block)).copied().unwrap_or(0)
    }

    /// A block may be entered once plus `loop_limit` times more.
    pub fn may_enter(&self, contract: usize, block: BlockId, loop_limit: u64) -> bool {
        self.visits(contract, block) <= loop_limit
    }

    /// Moves to the start of `block` in the executing contract.
    pub fn enter(&mut self, block: BlockId) {
        let contract = self.location.contract;

        let visits = self.visits(contract, block);
        self.visits.insert((contract, block), visits + 1);
        self.trace.push(block);

        self.location = Location {
            contract,
            block,
            index: 0,
        };
    }

    /// Entered blocks, oldest first.
    pub fn trace(&self) -> Vec<BlockId> {
        self.trace.to_vec()
    }

    /// Per-path counter for naming fresh inputs deterministically.
    pub fn fresh_id(&mut self) -> u64 {
        self.fresh += 1;
        self.fresh - 1
    }

    pub fn record_write(&mut self, slot: SymbolicValue, value: SymbolicValue) {
        let account = self.context.account.clone();

        self.storage.store(&account, slot.clone(), value.clone());
        self.writes.push(StorageWrite {
            account,
            slot,
            value,
        });
    }

    pub fn record_call(&mut self, call: CallRecord) {
        self.calls.push(call);
    }

    pub fn record_event(&mut self, topics: Vec<SymbolicValue>) {
        let emitter = self.context.account.clone();

        self.events.push(EventRecord { emitter, topics });
    }

    /// Storage writes in program order.
    pub fn writes(&self) -> Vec<StorageWrite> {
        self.writes.to_vec()
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.to_vec()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events.to_vec()
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn in_nested_call(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Saves the caller and switches to the callee. The caller resumes after
    /// the current instruction.
    pub fn enter_call(&mut self, call: NestedCall) {
        let resume = Location {
            index: self.location.index + 1,
            ..self.location
        };

        let label = format!("memory.call{}", self.fresh_id());

        let frame = CallFrame {
            resume,
            stack: std::mem::take(&mut self.stack),
            memory: std::mem::replace(&mut self.memory, Memory::new(label)),
            context: std::mem::replace(&mut self.context, call.context),
            storage: self.storage.clone(),
            transient: self.transient.clone(),
            writes: self.writes.clone(),
            events: self.events.clone(),
            ret_offset: call.ret_offset,
            ret_size: call.ret_size,
        };

        self.frames.push(frame);
        self.return_data = ReturnData::Empty;

        self.location.contract = self.context.contract;
        self.enter(call.entry);
    }

    /// Returns to the caller. A failed call rolls back its state changes.
    pub fn leave_call(&mut self, success: bool, output: ReturnData) -> Result<(), Fault> {
        let frame = match self.frames.pop() {
            Some(frame) => frame,
            None => return Ok(()),
        };

        if !success {
            self.storage = frame.storage;
            self.transient = frame.transient;
            self.writes = frame.writes;
            self.events = frame.events;
        }

        self.stack = frame.stack;
        self.memory = frame.memory;
        self.context = frame.context;
        self.location = frame.resume;

        copy_words(
            &mut self.memory,
            &frame.ret_offset,
            &frame.ret_size,
            |offset| output.load(offset),
        );

        self.return_data = output;

        self.push(Expr::from_bool(success))
    }
}

/// Upper bound of words moved by one copy instruction.
pub const MAX_COPY_WORDS: u64 = 64;

/// Copies `size` bytes word by word into memory at `destination`.
///
/// Symbolic sizes copy a single word. Copies are truncated at `MAX_COPY_WORDS`.
pub fn copy_words<F>(
    memory: &mut Memory,
    destination: &SymbolicValue,
    size: &SymbolicValue,
    mut source: F,
) where
    F: FnMut(&SymbolicValue) -> SymbolicValue,
{
    let words = match size.as_const() {
        Some(size) if size.is_zero() => 0,
        Some(size) => crate::symbolic::word::to_u64(&size)
            .map_or(MAX_COPY_WORDS, |s| s.div_ceil(32).min(MAX_COPY_WORDS)),
        None => 1,
    };

    for k in 0..words {
        let delta = Expr::from_u64(k * 32);
        let value = source(&delta);

        memory.store(
            Expr::binary(BinaryOp::Add, destination.clone(), delta),
            value,
        );
    }
}
