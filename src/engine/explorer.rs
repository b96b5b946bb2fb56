//! Depth-first path exploration.
//!
//! A path runs instruction by instruction until it forks or terminates. Forks
//! happen at branches with a symbolic condition and at jumps to a symbolic
//! target. Every child is checked for feasibility before it is scheduled, and
//! children that would re-enter a block more often than the loop limit allows
//! are dropped. Children that access a targeted storage slot are explored
//! before their siblings.

use super::{
    machine::ReturnData,
    profiler::Profiler,
    result::{Bound, ExecutionResult, Fault, Outcome},
    semantics::Effect,
    watchdog::Cancellation,
    Env, Path,
};
use crate::{
    constraints::ConstraintStore,
    program::{Block, BlockId, Exit},
    solver::Solver,
    symbolic::{word, Expr, SymbolicValue},
};
use log::{debug, info, trace};

/// Candidate successor of a control transfer.
struct Successor {
    /// `None` for a taken jump whose target is not a JUMPDEST.
    block: Option<BlockId>,
    guards: Vec<SymbolicValue>,
}

impl Successor {
    fn to(block: BlockId) -> Self {
        Self {
            block: Some(block),
            guards: Vec::new(),
        }
    }

    fn invalid() -> Self {
        Self {
            block: None,
            guards: Vec::new(),
        }
    }

    fn guarded(mut self, guard: SymbolicValue) -> Self {
        self.guards.push(guard);
        self
    }
}

enum Transition {
    Continue(Path),
    /// Children to schedule. Empty once the path terminated.
    Forked(Vec<Path>),
}

/// Explores paths of one worker with its own solver session.
pub struct Explorer<'a, S: Solver> {
    env: &'a Env,
    store: ConstraintStore<S>,
    cancellation: &'a Cancellation,
    profiler: Profiler,
    results: Vec<ExecutionResult>,
}

impl<'a, S: Solver> Explorer<'a, S> {
    pub fn new(env: &'a Env, solver: S, cancellation: &'a Cancellation) -> Self {
        Self {
            env,
            store: ConstraintStore::new(solver),
            cancellation,
            profiler: Profiler::new(),
            results: Vec::new(),
        }
    }

    /// Sequential depth-first search from `roots`. The first root is explored first.
    pub fn explore(&mut self, roots: Vec<Path>) {
        let mut pending = roots;
        pending.reverse();

        while let Some(path) = pending.pop() {
            if self.cancellation.is_cancelled() {
                self.terminate(path, Bound::Timeout.into());
                continue;
            }

            if pending.len() >= self.env.config.max_pending_paths {
                self.terminate(path, Bound::QueueSaturation.into());
                continue;
            }

            let mut children = self.run(path);
            children.reverse();
            pending.extend(children);
        }
    }

    /// Runs `path` until it forks or terminates. Returns the children to
    /// schedule, ordered by exploration priority.
    pub fn run(&mut self, mut path: Path) -> Vec<Path> {
        loop {
            match self.step(path) {
                Transition::Continue(next) => path = next,
                Transition::Forked(children) => return children,
            }
        }
    }

    /// Cuts off a path that will not be run any more.
    pub fn terminate(&mut self, path: Path, outcome: Outcome) {
        let env = self.env;
        let Path {
            state,
            constraints,
            contract,
            selector,
        } = path;

        let executing = env.contract(state.location.contract);
        let pc = executing
            .block(state.location.block)
            .instructions
            .get(state.location.index)
            .map(|i| i.pc);

        if env.config.print_paths {
            info!(
                "{} path ending in {} at block {}: {}",
                env.contract(contract).name(),
                outcome,
                state.location.block,
                constraints
            );
        }

        let test_case = if env.config.generate_test_cases && !self.cancellation.is_cancelled() {
            self.store.model(&constraints)
        } else {
            None
        };

        let storage_writes = if outcome.commits() || outcome.is_cutoff() {
            state.writes()
        } else {
            Vec::new()
        };

        debug!(
            "path terminated with {} after {} instructions",
            outcome,
            state.steps()
        );

        self.profiler.end_of_path(state.steps(), outcome.is_cutoff());

        self.results.push(ExecutionResult {
            contract: env.contract(contract).name().into(),
            selector,
            outcome,
            block: state.location.block,
            pc,
            constraints,
            storage_writes,
            calls: state.calls(),
            events: state.events(),
            trace: state.trace(),
            gas_used: state.gas_used(),
            steps: state.steps(),
            test_case,
        });
    }

    /// Results and profile of everything explored by this worker.
    pub fn finish(mut self) -> (Vec<ExecutionResult>, Profiler) {
        let times = self.store.take_solver_times();
        self.profiler.solver_statistics(self.store.statistics(), times);

        (self.results, self.profiler)
    }

    fn step(&mut self, mut path: Path) -> Transition {
        if self.cancellation.is_cancelled() {
            return self.end(path, Bound::Timeout.into());
        }

        let env = self.env;
        let location = path.state.location;
        let contract = env.contract(location.contract);
        let block = contract.block(location.block);

        let instruction = match block.instructions.get(location.index) {
            Some(instruction) => instruction,
            None => return self.fall_through(path, block),
        };

        if path.state.steps() >= env.config.depth_limit {
            return self.end(path, Bound::Depth.into());
        }

        let op = match instruction.opcode() {
            Some(op) => op,
            None => return self.end(path, Fault::InvalidOpcode.into()),
        };

        if let Err(outcome) = path.state.charge(op.gas()) {
            return self.end(path, outcome);
        }

        path.state.count_step();
        self.profiler.instruction_executed();

        trace!("{}: {}", contract.name(), instruction);

        match env.table.dispatch(&mut path.state, instruction, env) {
            Ok(Effect::Next) => {
                path.state.location.index += 1;
                Transition::Continue(path)
            }
            Ok(Effect::Enter) => Transition::Continue(path),
            Ok(Effect::Jump { target }) => self.jump(path, block, target),
            Ok(Effect::Branch { target, condition }) => {
                self.branch(path, block, target, condition)
            }
            Ok(Effect::Halt { outcome, output }) => self.halt(path, outcome, output),
            Err(outcome @ Outcome::Exception(_)) => self.halt(path, outcome, ReturnData::Empty),
            Err(outcome) => self.end(path, outcome),
        }
    }

    /// Halts the current frame. Nested frames return to their caller.
    fn halt(&mut self, mut path: Path, outcome: Outcome, output: ReturnData) -> Transition {
        if !path.state.in_nested_call() {
            return self.end(path, outcome);
        }

        let success = matches!(outcome, Outcome::Stop | Outcome::Return);

        debug!("nested call ended with {}", outcome);

        match path.state.leave_call(success, output) {
            Ok(()) => Transition::Continue(path),
            Err(fault) => self.end(path, fault.into()),
        }
    }

    /// Running off the end of a block. Blocks without fallthrough edge end in
    /// a terminating instruction, so only the end of the code remains, which
    /// halts like STOP.
    fn fall_through(&mut self, path: Path, block: &Block) -> Transition {
        match block.exit {
            Exit::Fallthrough { next } => self.fork(path, vec![Successor::to(next)]),
            _ => self.halt(path, Outcome::Stop, ReturnData::Empty),
        }
    }

    fn jump(&mut self, path: Path, block: &Block, target: SymbolicValue) -> Transition {
        let successors = self.jump_successors(&path, block, &target);

        self.fork(path, successors)
    }

    fn jump_successors(
        &self,
        path: &Path,
        block: &Block,
        target: &SymbolicValue,
    ) -> Vec<Successor> {
        let contract = self.env.contract(path.state.location.contract);

        match target.as_const() {
            Some(pc) => {
                match word::to_u64(&pc).and_then(|pc| contract.jumpdest(pc)) {
                    Some(destination) => vec![Successor::to(destination)],
                    None => vec![Successor::invalid()],
                }
            }
            None => {
                let successors = block
                    .exit
                    .jump_targets()
                    .iter()
                    .filter_map(|b| {
                        contract.pc_of(*b).map(|pc| {
                            Successor::to(*b)
                                .guarded(Expr::eq(target.clone(), Expr::from_u64(pc)))
                        })
                    })
                    .collect::<Vec<_>>();

                if successors.is_empty() {
                    debug!("symbolic jump target {} without resolved targets", target);

                    vec![Successor::invalid()]
                } else {
                    successors
                }
            }
        }
    }

    fn branch(
        &mut self,
        path: Path,
        block: &Block,
        target: SymbolicValue,
        condition: SymbolicValue,
    ) -> Transition {
        let fallthrough = match block.exit {
            Exit::Branch { fallthrough, .. } => fallthrough,
            _ => return self.end(path, Fault::InvalidJump.into()),
        };

        match condition.as_const() {
            Some(c) if c.is_zero() => {
                self.profiler.took_branch(false);
                self.fork(path, vec![Successor::to(fallthrough)])
            }
            Some(_) => {
                self.profiler.took_branch(true);
                self.jump(path, block, target)
            }
            None => {
                self.profiler.branch_with_symbolic_condition();

                let taken = Expr::is_non_zero(condition.clone());
                let mut successors = self
                    .jump_successors(&path, block, &target)
                    .into_iter()
                    .map(|s| s.guarded(taken.clone()))
                    .collect::<Vec<_>>();

                successors.push(Successor::to(fallthrough).guarded(Expr::is_zero(condition)));

                self.fork(path, successors)
            }
        }
    }

    /// Schedules every feasible successor of `path` that stays within the
    /// loop limit.
    fn fork(&mut self, path: Path, successors: Vec<Successor>) -> Transition {
        let mut feasible = Vec::with_capacity(successors.len());

        for successor in successors {
            let constraints = successor
                .guards
                .iter()
                .fold(path.constraints.clone(), |set, guard| set.assert(guard.clone()));

            if !successor.guards.is_empty() {
                if self.cancellation.is_cancelled() {
                    return self.end(path, Bound::Timeout.into());
                }

                if !self.store.is_satisfiable(&constraints) {
                    trace!("dropping infeasible successor {:?}", successor.block);
                    self.profiler.pruned_successor();
                    continue;
                }
            }

            feasible.push((successor, constraints));
        }

        if feasible.is_empty() {
            return self.end(path, Outcome::Pruned);
        }

        let contract = path.state.location.contract;
        let loop_limit = self.env.config.loop_limit;

        let (mut within, exceeding): (Vec<_>, Vec<_>) =
            feasible.into_iter().partition(|(successor, _)| {
                successor
                    .block
                    .map_or(true, |b| path.state.may_enter(contract, b, loop_limit))
            });

        if within.is_empty() {
            debug!(
                "all {} successors of block {} exceed the loop limit",
                exceeding.len(),
                path.state.location.block
            );
            return self.end(path, Bound::Loop.into());
        }

        // successors touching targeted storage go first, the rest keep their order
        within.sort_by_key(|(successor, _)| {
            !successor
                .block
                .map_or(false, |b| self.env.is_targeted(contract, b))
        });

        let block = path.state.location.block;
        let count = within.len();
        let mut parent = Some(path);
        let mut children = Vec::with_capacity(count);

        for (i, (successor, constraints)) in within.into_iter().enumerate() {
            // the last child takes over the parent's state
            let mut child = match parent.take() {
                Some(path) if i + 1 < count => {
                    let child = path.clone();
                    parent = Some(path);
                    child
                }
                Some(path) => path,
                None => unreachable!("the parent is kept until its last child"),
            };
            child.constraints = constraints;

            match successor.block {
                Some(block) => {
                    child.state.enter(block);
                    children.push(child);
                }
                None => match self.halt(child, Fault::InvalidJump.into(), ReturnData::Empty) {
                    Transition::Continue(caller) => children.push(caller),
                    Transition::Forked(more) => children.extend(more),
                },
            }
        }

        if children.len() == 1 {
            return Transition::Continue(children.remove(0));
        }

        if children.len() > 1 {
            debug!("forked {} paths at block {}", children.len(), block);
            self.profiler.forked(children.len());
        }

        Transition::Forked(children)
    }

    fn end(&mut self, path: Path, outcome: Outcome) -> Transition {
        self.terminate(path, outcome);

        Transition::Forked(Vec::new())
    }
}
