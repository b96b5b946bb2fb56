#![allow(dead_code)]

use hyperion::{
    engine::{run, ExitCode, Inputs, TargetedParameters},
    program::{Block, BlockId, Exit, Instruction, Opcode, Program, PublicFunction},
    report::{ContractReport, RunReport},
    symbolic::Word,
    Config,
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Once},
};
use tempfile::{tempdir, TempDir};
use Asm::*;

static INIT_LOGGER: Once = Once::new();

pub fn init() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn with_temp_dir<F, R>(f: F) -> R
where
    F: FnOnce(Arc<TempDir>) -> R,
{
    let temp_dir = Arc::new(tempdir().expect("can create temporary directory"));

    f(temp_dir)
}

/// Assembly item of a test program.
#[derive(Clone, Copy, Debug)]
pub enum Asm {
    Op(Opcode),
    Push(u64),
    /// PUSH1 of the first pc of a block.
    Label(BlockId),
}

fn size(item: &Asm) -> u64 {
    match item {
        Asm::Op(_) => 1,
        Asm::Push(value) => 1 + ((64 - value.leading_zeros() as u64 + 7) / 8).max(1),
        Asm::Label(_) => 2,
    }
}

/// Lays out blocks in insertion order and resolves labels to their pcs.
pub struct ProgramBuilder {
    name: String,
    address: Option<Word>,
    blocks: Vec<(BlockId, Vec<Asm>, Exit)>,
    functions: Vec<PublicFunction>,
}

impl ProgramBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            address: None,
            blocks: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn at(mut self, address: u64) -> Self {
        self.address = Some(Word::from(address));
        self
    }

    pub fn block(mut self, id: BlockId, code: &[Asm], exit: Exit) -> Self {
        self.blocks.push((id, code.to_vec(), exit));
        self
    }

    pub fn function(mut self, selector: u32, entry: BlockId) -> Self {
        self.functions.push(PublicFunction {
            selector,
            name: None,
            entry,
        });
        self
    }

    pub fn build(self) -> Program {
        let mut pc = 0;
        let mut starts = BTreeMap::new();

        for (id, code, _) in self.blocks.iter() {
            starts.insert(*id, pc);
            pc += code.iter().map(size).sum::<u64>();
        }

        let blocks = self
            .blocks
            .into_iter()
            .map(|(id, code, exit)| {
                let mut pc = starts[&id];

                let instructions = code
                    .iter()
                    .map(|item| {
                        let instruction = match item {
                            Asm::Op(op) => Instruction::new(pc, *op),
                            Asm::Push(value) => Instruction::push(pc, Word::from(*value)),
                            Asm::Label(block) => Instruction::push(pc, Word::from(starts[block])),
                        };
                        pc += size(item);
                        instruction
                    })
                    .collect();

                (
                    id,
                    Block {
                        id,
                        instructions,
                        exit,
                    },
                )
            })
            .collect();

        Program {
            name: self.name,
            address: self.address,
            bytecode_hash: None,
            code_size: None,
            entry: 0,
            blocks,
            functions: self.functions,
        }
    }
}

/// Writes 1 to slot 0 and returns if calldata word 4 is greater than zero,
/// writes 2 to slot 0 and reverts otherwise.
pub fn branching(name: &str) -> Program {
    ProgramBuilder::new(name)
        .block(
            0,
            &[
                Push(0),
                Push(4),
                Op(Opcode::CallDataLoad),
                Op(Opcode::Gt),
                Label(2),
                Op(Opcode::JumpI),
            ],
            Exit::Branch {
                targets: vec![2],
                fallthrough: 1,
            },
        )
        .block(
            1,
            &[
                Push(2),
                Push(0),
                Op(Opcode::SStore),
                Push(0),
                Op(Opcode::Dup1),
                Op(Opcode::Revert),
            ],
            Exit::Halt,
        )
        .block(
            2,
            &[
                Op(Opcode::JumpDest),
                Push(1),
                Push(0),
                Op(Opcode::SStore),
                Push(0),
                Op(Opcode::Dup1),
                Op(Opcode::Return),
            ],
            Exit::Halt,
        )
        .build()
}

/// Returns if calldata word 4 is greater than zero, reverts otherwise.
/// Neither branch touches storage.
pub fn guarded_revert(name: &str) -> Program {
    ProgramBuilder::new(name)
        .block(
            0,
            &[
                Push(0),
                Push(4),
                Op(Opcode::CallDataLoad),
                Op(Opcode::Gt),
                Label(2),
                Op(Opcode::JumpI),
            ],
            Exit::Branch {
                targets: vec![2],
                fallthrough: 1,
            },
        )
        .block(
            1,
            &[Push(0), Op(Opcode::Dup1), Op(Opcode::Return)],
            Exit::Halt,
        )
        .block(
            2,
            &[
                Op(Opcode::JumpDest),
                Push(0),
                Op(Opcode::Dup1),
                Op(Opcode::Revert),
            ],
            Exit::Halt,
        )
        .build()
}

/// Writes slot 1 on the taken branch and slot 2 on the fallthrough.
pub fn two_slots(name: &str) -> Program {
    ProgramBuilder::new(name)
        .block(
            0,
            &[
                Push(0),
                Push(4),
                Op(Opcode::CallDataLoad),
                Op(Opcode::Gt),
                Label(2),
                Op(Opcode::JumpI),
            ],
            Exit::Branch {
                targets: vec![2],
                fallthrough: 1,
            },
        )
        .block(
            1,
            &[Push(7), Push(2), Op(Opcode::SStore), Op(Opcode::Stop)],
            Exit::Halt,
        )
        .block(
            2,
            &[
                Op(Opcode::JumpDest),
                Push(7),
                Push(1),
                Op(Opcode::SStore),
                Op(Opcode::Stop),
            ],
            Exit::Halt,
        )
        .build()
}

/// Branches twice on the same condition. The second fallthrough is infeasible.
pub fn rebranching(name: &str) -> Program {
    let condition = [Push(0), Push(4), Op(Opcode::CallDataLoad), Op(Opcode::Gt)];

    ProgramBuilder::new(name)
        .block(
            0,
            &[&condition[..], &[Label(2), Op(Opcode::JumpI)][..]].concat(),
            Exit::Branch {
                targets: vec![2],
                fallthrough: 1,
            },
        )
        .block(1, &[Op(Opcode::Stop)], Exit::Halt)
        .block(
            2,
            &[
                &[Op(Opcode::JumpDest)][..],
                &condition[..],
                &[Label(3), Op(Opcode::JumpI)][..],
            ]
            .concat(),
            Exit::Branch {
                targets: vec![3],
                fallthrough: 4,
            },
        )
        .block(3, &[Op(Opcode::JumpDest), Op(Opcode::Stop)], Exit::Halt)
        .block(4, &[Op(Opcode::Stop)], Exit::Halt)
        .build()
}

/// A block that jumps to itself forever.
pub fn self_loop(name: &str) -> Program {
    ProgramBuilder::new(name)
        .block(
            0,
            &[Op(Opcode::JumpDest), Label(0), Op(Opcode::Jump)],
            Exit::Jump { targets: vec![0] },
        )
        .build()
}

/// Calls `target` without arguments, then writes 1 to slot 0.
pub fn calling(name: &str, target: u64) -> Program {
    ProgramBuilder::new(name)
        .block(
            0,
            &[
                Push(0),
                Push(0),
                Push(0),
                Push(0),
                Push(0),
                Push(target),
                Op(Opcode::Gas),
                Op(Opcode::Call),
                Op(Opcode::Pop),
                Push(1),
                Push(0),
                Op(Opcode::SStore),
                Op(Opcode::Stop),
            ],
            Exit::Halt,
        )
        .build()
}

/// Solidity `assert(false)`.
pub fn asserting(name: &str) -> Program {
    ProgramBuilder::new(name)
        .block(0, &[Op(Opcode::Invalid)], Exit::Halt)
        .build()
}

pub fn analyze(programs: Vec<Program>, config: Config) -> (RunReport, ExitCode) {
    analyze_targets(programs, TargetedParameters::default(), config)
}

pub fn analyze_targets(
    programs: Vec<Program>,
    targets: TargetedParameters,
    config: Config,
) -> (RunReport, ExitCode) {
    init();

    run(Inputs {
        programs,
        targets,
        config,
    })
}

pub fn contract<'a>(report: &'a RunReport, name: &str) -> &'a ContractReport {
    report
        .contracts
        .get(name)
        .unwrap_or_else(|| panic!("report has an entry for {}", name))
}
