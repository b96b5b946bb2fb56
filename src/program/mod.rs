//! Decompiled contract programs: basic blocks of typed instructions.
//!
//! A `Program` is the plain record produced by the decompiler. `Contract`
//! is the validated, read-only form the engine executes.

pub mod opcode;

pub use self::opcode::Opcode;

use crate::symbolic::Word;
use log::debug;
use petgraph::{graphmap::DiGraphMap, visit::Dfs};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
};
use thiserror::Error;

pub type BlockId = u64;

/// Operation of an instruction as emitted by the decompiler.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operation {
    Known(Opcode),
    /// Mnemonic without semantics. Rejected during setup.
    Unsupported(String),
}

impl Operation {
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Operation::Known(op) => Some(*op),
            Operation::Unsupported(_) => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Known(op) => write!(f, "{}", op),
            Operation::Unsupported(mnemonic) => write!(f, "{}", mnemonic),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub pc: u64,
    pub op: Operation,
    /// Immediate of PUSH instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg: Option<Word>,
}

impl Instruction {
    pub fn new(pc: u64, op: Opcode) -> Self {
        Self {
            pc,
            op: Operation::Known(op),
            arg: None,
        }
    }

    pub fn push(pc: u64, value: Word) -> Self {
        let bytes = (value.bit_len() + 7) / 8;
        let op = Opcode::from_byte(0x5f + bytes.max(1) as u8).unwrap_or(Opcode::Push32);

        Self {
            pc,
            op: Operation::Known(op),
            arg: Some(value),
        }
    }

    pub fn opcode(&self) -> Option<Opcode> {
        self.op.opcode()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{:#06x}: {} {:#x}", self.pc, self.op, arg),
            None => write!(f, "{:#06x}: {}", self.pc, self.op),
        }
    }
}

/// Outgoing edges of a block.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Exit {
    /// Control continues in `next` without a jump.
    Fallthrough { next: BlockId },
    /// Ends in JUMP. `targets` lists the resolved destinations.
    Jump { targets: Vec<BlockId> },
    /// Ends in JUMPI.
    Branch {
        targets: Vec<BlockId>,
        fallthrough: BlockId,
    },
    /// Ends in a halting instruction.
    Halt,
}

impl Exit {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Exit::Fallthrough { next } => vec![*next],
            Exit::Jump { targets } => targets.clone(),
            Exit::Branch {
                targets,
                fallthrough,
            } => targets
                .iter()
                .copied()
                .chain(std::iter::once(*fallthrough))
                .collect(),
            Exit::Halt => vec![],
        }
    }

    pub fn jump_targets(&self) -> &[BlockId] {
        match self {
            Exit::Jump { targets } | Exit::Branch { targets, .. } => targets,
            _ => &[],
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
    pub exit: Exit,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PublicFunction {
    pub selector: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub entry: BlockId,
}

/// Decompiler output for one contract.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Word>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytecode_hash: Option<Word>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_size: Option<u64>,
    pub entry: BlockId,
    pub blocks: BTreeMap<BlockId, Block>,
    #[serde(default)]
    pub functions: Vec<PublicFunction>,
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProgramError {
    #[error("contract {contract}: entry block {block} does not exist")]
    MissingEntry { contract: String, block: BlockId },

    #[error("contract {contract}: block {from} has an edge to missing block {to}")]
    DanglingEdge {
        contract: String,
        from: BlockId,
        to: BlockId,
    },

    #[error("contract {contract}: block stored under key {key} claims id {id}")]
    IdMismatch {
        contract: String,
        key: BlockId,
        id: BlockId,
    },

    #[error("contract {contract}: block {block} {reason}")]
    ExitMismatch {
        contract: String,
        block: BlockId,
        reason: &'static str,
    },

    #[error("contract {contract}: {op} at pc {pc:#x} in block {block} has no immediate")]
    MissingImmediate {
        contract: String,
        block: BlockId,
        pc: u64,
        op: Opcode,
    },

    #[error("contract {contract}: unsupported opcode {mnemonic} at pc {pc:#x} in block {block}")]
    UnsupportedOpcode {
        contract: String,
        block: BlockId,
        pc: u64,
        mnemonic: String,
    },

    #[error("contract {contract}: function {selector:#010x} enters missing block {block}")]
    MissingFunctionEntry {
        contract: String,
        selector: u32,
        block: BlockId,
    },
}

/// Validated program with the lookups the engine needs.
#[derive(Clone, Debug)]
pub struct Contract {
    program: Program,
    jumpdests: HashMap<u64, BlockId>,
    pc_of_block: HashMap<BlockId, u64>,
    reachable: BTreeSet<BlockId>,
}

impl Contract {
    pub fn new(program: Program) -> Result<Self, ProgramError> {
        validate(&program)?;

        let mut jumpdests = HashMap::new();
        let mut pc_of_block = HashMap::new();

        program.blocks.values().for_each(|block| {
            if let Some(first) = block.instructions.first() {
                pc_of_block.insert(block.id, first.pc);

                if first.opcode() == Some(Opcode::JumpDest) {
                    jumpdests.insert(first.pc, block.id);
                }
            }
        });

        let reachable = reachable_blocks(&program);

        let unreachable = program.blocks.len() - reachable.len();
        if unreachable > 0 {
            debug!(
                "contract {}: {} of {} blocks are unreachable from entry",
                program.name,
                unreachable,
                program.blocks.len()
            );
        }

        Ok(Self {
            program,
            jumpdests,
            pc_of_block,
            reachable,
        })
    }

    pub fn name(&self) -> &str {
        &self.program.name
    }

    pub fn address(&self) -> Option<Word> {
        self.program.address
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn entry(&self) -> BlockId {
        self.program.entry
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.program.blocks[&id]
    }

    /// Block starting with a JUMPDEST at `pc`.
    pub fn jumpdest(&self, pc: u64) -> Option<BlockId> {
        self.jumpdests.get(&pc).copied()
    }

    pub fn pc_of(&self, block: BlockId) -> Option<u64> {
        self.pc_of_block.get(&block).copied()
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.reachable.contains(&block)
    }

    pub fn functions(&self) -> &[PublicFunction] {
        &self.program.functions
    }
}

fn validate(program: &Program) -> Result<(), ProgramError> {
    let contract = || program.name.clone();

    if !program.blocks.contains_key(&program.entry) {
        return Err(ProgramError::MissingEntry {
            contract: contract(),
            block: program.entry,
        });
    }

    for (key, block) in program.blocks.iter() {
        if *key != block.id {
            return Err(ProgramError::IdMismatch {
                contract: contract(),
                key: *key,
                id: block.id,
            });
        }

        if let Some(to) = block
            .exit
            .successors()
            .into_iter()
            .find(|to| !program.blocks.contains_key(to))
        {
            return Err(ProgramError::DanglingEdge {
                contract: contract(),
                from: block.id,
                to,
            });
        }

        for instruction in block.instructions.iter() {
            match instruction.opcode() {
                None => {
                    return Err(ProgramError::UnsupportedOpcode {
                        contract: contract(),
                        block: block.id,
                        pc: instruction.pc,
                        mnemonic: instruction.op.to_string(),
                    })
                }
                Some(op) if op.immediate_size() > 0 && instruction.arg.is_none() => {
                    return Err(ProgramError::MissingImmediate {
                        contract: contract(),
                        block: block.id,
                        pc: instruction.pc,
                        op,
                    })
                }
                _ => {}
            }
        }

        if let Some(reason) = exit_mismatch(block) {
            return Err(ProgramError::ExitMismatch {
                contract: contract(),
                block: block.id,
                reason,
            });
        }
    }

    if let Some(function) = program
        .functions
        .iter()
        .find(|f| !program.blocks.contains_key(&f.entry))
    {
        return Err(ProgramError::MissingFunctionEntry {
            contract: contract(),
            selector: function.selector,
            block: function.entry,
        });
    }

    Ok(())
}

fn exit_mismatch(block: &Block) -> Option<&'static str> {
    let last = block.instructions.last().and_then(Instruction::opcode);

    let terminator = block
        .instructions
        .iter()
        .rev()
        .skip(1)
        .filter_map(Instruction::opcode)
        .any(Opcode::is_block_terminator);

    if terminator {
        return Some("has a terminating instruction before its end");
    }

    match (&block.exit, last) {
        (Exit::Jump { .. }, Some(Opcode::Jump)) => None,
        (Exit::Jump { .. }, _) => Some("has a jump exit but does not end in JUMP"),
        (Exit::Branch { .. }, Some(Opcode::JumpI)) => None,
        (Exit::Branch { .. }, _) => Some("has a branch exit but does not end in JUMPI"),
        (Exit::Halt, Some(op)) if op.is_block_terminator() && !is_jump(op) => None,
        (Exit::Halt, _) => Some("has a halt exit but does not end in a halting instruction"),
        (Exit::Fallthrough { .. }, Some(op)) if op.is_block_terminator() => {
            Some("falls through after a terminating instruction")
        }
        (Exit::Fallthrough { .. }, _) => None,
    }
}

fn is_jump(op: Opcode) -> bool {
    matches!(op, Opcode::Jump | Opcode::JumpI)
}

fn reachable_blocks(program: &Program) -> BTreeSet<BlockId> {
    let mut graph = DiGraphMap::<BlockId, ()>::new();

    program.blocks.values().for_each(|block| {
        graph.add_node(block.id);
        block.exit.successors().into_iter().for_each(|to| {
            graph.add_edge(block.id, to, ());
        });
    });

    // calldata dispatch is not always resolved by the decompiler
    let roots = std::iter::once(program.entry).chain(program.functions.iter().map(|f| f.entry));

    let mut reachable = BTreeSet::new();
    for root in roots {
        let mut dfs = Dfs::new(&graph, root);
        while let Some(block) = dfs.next(&graph) {
            reachable.insert(block);
        }
    }

    reachable
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: BlockId, instructions: Vec<Instruction>, exit: Exit) -> (BlockId, Block) {
        (
            id,
            Block {
                id,
                instructions,
                exit,
            },
        )
    }

    fn program(blocks: Vec<(BlockId, Block)>) -> Program {
        Program {
            name: "Token".to_string(),
            address: None,
            bytecode_hash: None,
            code_size: None,
            entry: 0,
            blocks: blocks.into_iter().collect(),
            functions: vec![],
        }
    }

    #[test]
    fn dangling_edges_are_rejected() {
        let program = program(vec![block(
            0,
            vec![Instruction::new(0, Opcode::JumpDest)],
            Exit::Fallthrough { next: 7 },
        )]);

        assert_eq!(
            Contract::new(program).err(),
            Some(ProgramError::DanglingEdge {
                contract: "Token".to_string(),
                from: 0,
                to: 7
            })
        );
    }

    #[test]
    fn missing_entry_is_rejected() {
        let mut program = program(vec![block(
            0,
            vec![Instruction::new(0, Opcode::Stop)],
            Exit::Halt,
        )]);
        program.entry = 3;

        assert!(matches!(
            Contract::new(program),
            Err(ProgramError::MissingEntry { block: 3, .. })
        ));
    }

    #[test]
    fn exits_must_match_the_last_instruction() {
        let program = program(vec![block(
            0,
            vec![Instruction::new(0, Opcode::Stop)],
            Exit::Jump { targets: vec![0] },
        )]);

        assert!(matches!(
            Contract::new(program),
            Err(ProgramError::ExitMismatch { block: 0, .. })
        ));
    }

    #[test]
    fn unknown_mnemonics_deserialize_as_unsupported() {
        let instruction: Instruction =
            serde_json::from_str(r#"{"pc": 4, "op": "PUSH33"}"#).expect("valid record");

        assert_eq!(instruction.op, Operation::Unsupported("PUSH33".to_string()));

        let instruction: Instruction =
            serde_json::from_str(r#"{"pc": 4, "op": "PUSH1", "arg": "0x2a"}"#)
                .expect("valid record");

        assert_eq!(instruction.opcode(), Some(Opcode::Push1));
        assert_eq!(instruction.arg, Some(Word::from(42_u64)));
    }

    #[test]
    fn jumpdests_are_indexed_by_pc() {
        let program = program(vec![
            block(
                0,
                vec![
                    Instruction::push(0, Word::from(5_u64)),
                    Instruction::new(2, Opcode::Jump),
                ],
                Exit::Jump { targets: vec![1] },
            ),
            block(
                1,
                vec![
                    Instruction::new(5, Opcode::JumpDest),
                    Instruction::new(6, Opcode::Stop),
                ],
                Exit::Halt,
            ),
            block(2, vec![Instruction::new(7, Opcode::Stop)], Exit::Halt),
        ]);

        let contract = Contract::new(program).expect("well-formed program");

        assert_eq!(contract.jumpdest(5), Some(1));
        assert_eq!(contract.jumpdest(0), None);
        assert!(contract.is_reachable(1));
        assert!(!contract.is_reachable(2));
    }
}
