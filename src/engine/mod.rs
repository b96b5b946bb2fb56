//! Bounded symbolic execution of decompiled contracts.

pub mod explorer;
pub mod machine;
pub mod memory;
pub mod parallel;
pub mod persistent;
pub mod profiler;
pub mod result;
pub mod semantics;
pub mod watchdog;

pub use self::{
    explorer::Explorer,
    machine::MachineState,
    profiler::Profiler,
    result::{Bound, ExecutionResult, Fault, Outcome},
    semantics::SemanticsTable,
    watchdog::Cancellation,
};

use self::machine::{CallData, Context};
use crate::{
    config::{Config, SolverBackend},
    constraints::PathConstraintSet,
    program::{Block, BlockId, Contract, Opcode, Program, ProgramError},
    report::{Aggregator, RunReport},
    solver::{NoneSolver, ProbeSolver, Solver},
    symbolic::{BinaryOp, Expr, SymbolicValue, Word},
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error;

/// Read-only environment shared by all workers of a run.
pub struct Env {
    contracts: Vec<Contract>,
    addresses: HashMap<Word, usize>,
    /// Blocks accessing a targeted storage slot through a constant key.
    targeted_blocks: BTreeSet<(usize, BlockId)>,
    pub config: Config,
    pub table: SemanticsTable,
}

impl Env {
    pub fn new(contracts: Vec<Contract>, config: Config) -> Self {
        let addresses = contracts
            .iter()
            .enumerate()
            .filter_map(|(index, c)| c.address().map(|a| (a, index)))
            .collect();

        Self {
            contracts,
            addresses,
            targeted_blocks: BTreeSet::new(),
            config,
            table: SemanticsTable::new(),
        }
    }

    /// Explores blocks that read or write one of `slots` ahead of their siblings.
    pub fn with_targeted_slots(mut self, slots: &BTreeSet<Word>) -> Self {
        self.targeted_blocks = self
            .contracts
            .iter()
            .enumerate()
            .flat_map(|(index, contract)| {
                contract
                    .program()
                    .blocks
                    .values()
                    .filter(move |block| accesses_slot(block, slots))
                    .map(move |block| (index, block.id))
            })
            .collect();

        if !self.targeted_blocks.is_empty() {
            debug!(
                "{} blocks access targeted storage slots",
                self.targeted_blocks.len()
            );
        }

        self
    }

    pub fn is_targeted(&self, contract: usize, block: BlockId) -> bool {
        self.targeted_blocks.contains(&(contract, block))
    }

    pub fn contract(&self, index: usize) -> &Contract {
        &self.contracts[index]
    }

    pub fn contracts(&self) -> &[Contract] {
        &self.contracts
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.contracts.iter().position(|c| c.name() == name)
    }

    /// Contract deployed at a concrete `address`.
    pub fn resolve(&self, address: &SymbolicValue) -> Option<usize> {
        address
            .as_const()
            .and_then(|a| self.addresses.get(&a).copied())
    }
}

fn accesses_slot(block: &Block, slots: &BTreeSet<Word>) -> bool {
    block.instructions.windows(2).any(|pair| {
        matches!(pair[1].opcode(), Some(Opcode::SLoad | Opcode::SStore))
            && pair[0].arg.as_ref().map_or(false, |key| slots.contains(key))
    })
}

/// One execution path: its machine state and the constraints that lead to it.
#[derive(Clone, Debug)]
pub struct Path {
    pub state: MachineState,
    pub constraints: PathConstraintSet,
    /// Analyzed contract the path started in.
    pub contract: usize,
    pub selector: Option<u32>,
}

/// Function selectors and storage slots of interest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetedParameters {
    /// Restricts exploration roots. Empty explores all entry points.
    pub selectors: BTreeSet<u32>,
    /// Explored first and flagged in the storage summary of the report.
    pub storage_slots: BTreeSet<Word>,
}

pub struct Inputs {
    pub programs: Vec<Program>,
    pub targets: TargetedParameters,
    pub config: Config,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCode {
    Success = 0,
    InvalidInput = 1,
    SolverUnavailable = 2,
    UnsupportedOpcode = 3,
    UnknownTarget = 4,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Faults that abort a run.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error("contract {0} is defined more than once")]
    DuplicateContract(String),

    #[error("target contract {0} is not among the analyzed programs")]
    UnknownTarget(String),

    #[error("solver backend {0} is not available in this build")]
    SolverUnavailable(SolverBackend),

    #[error("no semantics for opcode {0}")]
    MissingSemantics(Opcode),

    #[error("failed to create output directory {path:?}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SetupError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            SetupError::Program(ProgramError::UnsupportedOpcode { .. })
            | SetupError::MissingSemantics(_) => ExitCode::UnsupportedOpcode,
            SetupError::SolverUnavailable(_) => ExitCode::SolverUnavailable,
            SetupError::UnknownTarget(_) => ExitCode::UnknownTarget,
            _ => ExitCode::InvalidInput,
        }
    }
}

/// Analyzes every target program and reports the result with the exit code
/// of the run. Setup faults yield an empty report.
pub fn run(inputs: Inputs) -> (RunReport, ExitCode) {
    match try_run(inputs) {
        Ok(report) => {
            let exit_code = report.exit_code;
            (report, exit_code)
        }
        Err(e) => {
            error!("{}", e);

            let exit_code = e.exit_code();
            (RunReport::failed(exit_code), exit_code)
        }
    }
}

pub fn try_run(inputs: Inputs) -> Result<RunReport, SetupError> {
    let Inputs {
        programs,
        targets,
        config,
    } = inputs;

    let env = time_info!("validating programs", { setup(programs, config)? })
        .with_targeted_slots(&targets.storage_slots);
    let analyzed = target_contracts(&env)?;

    if env.config.store_result {
        std::fs::create_dir_all(&env.config.output_dir).map_err(|source| {
            SetupError::OutputDirectory {
                path: env.config.output_dir.clone(),
                source,
            }
        })?;
    }

    let mut report = match env.config.solver {
        SolverBackend::Builtin => analyze::<ProbeSolver>(&env, &analyzed, &targets),
        SolverBackend::None => analyze::<NoneSolver>(&env, &analyzed, &targets),
        #[cfg(feature = "z3")]
        SolverBackend::Z3 => analyze::<crate::solver::Z3Solver>(&env, &analyzed, &targets),
        #[cfg(not(feature = "z3"))]
        SolverBackend::Z3 => return Err(SetupError::SolverUnavailable(SolverBackend::Z3)),
    };

    // the analysis itself succeeded, so its report is still returned
    if env.config.store_result {
        if let Err(e) = report.persist(&env.config.output_dir) {
            error!("{}", e);
            report.exit_code = ExitCode::InvalidInput;
        }
    }

    Ok(report)
}

fn setup(programs: Vec<Program>, config: Config) -> Result<Env, SetupError> {
    if config.solver == SolverBackend::Z3 && !cfg!(feature = "z3") {
        return Err(SetupError::SolverUnavailable(config.solver));
    }

    let mut names = BTreeSet::new();
    if let Some(duplicate) = programs.iter().find(|p| !names.insert(p.name.clone())) {
        return Err(SetupError::DuplicateContract(duplicate.name.clone()));
    }

    let contracts = programs
        .into_iter()
        .map(Contract::new)
        .collect::<Result<Vec<_>, _>>()?;

    let env = Env::new(contracts, config);

    env.table.validate().map_err(SetupError::MissingSemantics)?;

    Ok(env)
}

fn target_contracts(env: &Env) -> Result<Vec<usize>, SetupError> {
    if env.config.target_contracts.is_empty() {
        return Ok((0..env.contracts().len()).collect());
    }

    env.config
        .target_contracts
        .iter()
        .map(|name| {
            env.index_of(name)
                .ok_or_else(|| SetupError::UnknownTarget(name.clone()))
        })
        .collect()
}

/// Explores `contracts` of `env` with solver backend `S`.
pub fn analyze<S: Solver>(
    env: &Env,
    contracts: &[usize],
    targets: &TargetedParameters,
) -> RunReport {
    let cancellation = Cancellation::new();
    let mut profiler = Profiler::new();

    let (reports, took) = time!({
        watchdog::with_deadline(env.config.global_timeout(), &cancellation, || {
            contracts
                .iter()
                .map(|index| {
                    let contract = env.contract(*index);
                    let roots = roots(env, *index, targets);

                    info!(
                        "exploring {} from {} roots using {}",
                        contract.name(),
                        roots.len(),
                        S::name()
                    );

                    let (results, mut profile) = if env.config.parallel {
                        parallel::explore::<S>(env, roots, &cancellation)
                    } else {
                        let solver = S::new(env.config.solver_timeout());
                        let mut explorer = Explorer::new(env, solver, &cancellation);
                        explorer.explore(roots);
                        explorer.finish()
                    };

                    let mut aggregator = Aggregator::new(contract, targets);
                    results.into_iter().for_each(|r| aggregator.ingest(r));
                    aggregator.count_unknown_queries(profile.unknown_queries());

                    profiler.merge_with(&mut profile);

                    (contract.name().to_string(), aggregator.finish())
                })
                .collect::<BTreeMap<_, _>>()
        })
    });

    profiler.exploration_took(took);
    info!("profile:\n{}", profiler);

    reports
        .iter()
        .filter(|(_, report)| report.inconclusive)
        .for_each(|(name, report)| {
            warn!(
                "analysis of {} is inconclusive: no path finished, {} were cut off",
                name, report.cutoffs
            )
        });

    RunReport::new(reports, ExitCode::Success)
}

/// Initial paths of `contract`: one per targeted selector, or a single
/// unconstrained entry path.
pub fn roots(env: &Env, contract: usize, targets: &TargetedParameters) -> Vec<Path> {
    let program = env.contract(contract);

    let root = |selector: Option<u32>| {
        let name: Arc<str> = Arc::from(program.name());

        let address = match program.address() {
            Some(address) => Expr::constant(address),
            None => Expr::input(format!("address[{}]", name)),
        };

        let context = Context {
            contract,
            code: name.clone(),
            account: name,
            address,
            caller: Expr::input("caller"),
            value: Expr::input("callvalue"),
            calldata: CallData::Input,
            is_static: false,
        };

        let mut state = MachineState::new(context, program.entry(), env.config.gas_limit);
        state.enter(program.entry());

        let constraints = match selector {
            Some(selector) => PathConstraintSet::new().assert(Expr::eq(
                Expr::from_u64(selector as u64),
                Expr::binary(
                    BinaryOp::Shr,
                    Expr::from_u64(0xe0),
                    CallData::Input.load(&Expr::from_u64(0)),
                ),
            )),
            None => PathConstraintSet::new(),
        };

        Path {
            state,
            constraints,
            contract,
            selector,
        }
    };

    if targets.selectors.is_empty() {
        return vec![root(None)];
    }

    targets
        .selectors
        .iter()
        .filter(|selector| {
            let known = program.functions().is_empty()
                || program.functions().iter().any(|f| f.selector == **selector);

            if !known {
                warn!(
                    "{} has no public function with selector {:#010x}",
                    program.name(),
                    selector
                );
            }

            known
        })
        .map(|selector| root(Some(*selector)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Block, Exit, Instruction, PublicFunction};

    fn program(name: &str) -> Program {
        Program {
            name: name.to_string(),
            address: Some(Word::from(0xbeef_u64)),
            bytecode_hash: None,
            code_size: None,
            entry: 0,
            blocks: [(
                0,
                Block {
                    id: 0,
                    instructions: vec![Instruction::new(0, Opcode::Stop)],
                    exit: Exit::Halt,
                },
            )]
            .into_iter()
            .collect(),
            functions: vec![PublicFunction {
                selector: 0xa9059cbb,
                name: Some("transfer".to_string()),
                entry: 0,
            }],
        }
    }

    #[test]
    fn addresses_resolve_to_contracts() {
        let contract = Contract::new(program("Token")).expect("valid program");
        let env = Env::new(vec![contract], Config::for_tests());

        assert_eq!(env.resolve(&Expr::from_u64(0xbeef)), Some(0));
        assert_eq!(env.resolve(&Expr::input("target")), None);
        assert_eq!(env.index_of("Token"), Some(0));
    }

    #[test]
    fn unknown_selectors_are_skipped() {
        let contract = Contract::new(program("Token")).expect("valid program");
        let env = Env::new(vec![contract], Config::for_tests());

        let targets = TargetedParameters {
            selectors: [0xa9059cbb, 0x12345678].into_iter().collect(),
            storage_slots: BTreeSet::new(),
        };

        let roots = roots(&env, 0, &targets);

        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].selector, Some(0xa9059cbb));
        assert_eq!(roots[0].constraints.len(), 1);
        assert_eq!(roots[0].state.visits(0, 0), 1);
    }

    #[test]
    fn only_constant_slot_keys_target_a_block() {
        let mut program = program("Token");
        program.blocks.insert(
            1,
            Block {
                id: 1,
                instructions: vec![
                    Instruction::push(1, Word::from(7_u64)),
                    Instruction::push(3, Word::from(3_u64)),
                    Instruction::new(5, Opcode::SStore),
                ],
                exit: Exit::Fallthrough { next: 0 },
            },
        );

        let contract = Contract::new(program).expect("valid program");
        let env = Env::new(vec![contract.clone()], Config::for_tests())
            .with_targeted_slots(&[Word::from(3_u64)].into_iter().collect());

        assert!(env.is_targeted(0, 1));
        assert!(!env.is_targeted(0, 0));

        let env = Env::new(vec![contract], Config::for_tests())
            .with_targeted_slots(&[Word::from(7_u64)].into_iter().collect());

        assert!(!env.is_targeted(0, 1));
    }

    #[test]
    fn setup_errors_map_to_exit_codes() {
        let duplicate = setup(vec![program("Token"), program("Token")], Config::for_tests());
        assert!(matches!(duplicate, Err(SetupError::DuplicateContract(_))));

        let error = SetupError::UnknownTarget("Vault".to_string());
        assert_eq!(error.exit_code(), ExitCode::UnknownTarget);
        assert_eq!(error.exit_code().code(), 4);
    }
}
