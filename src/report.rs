//! Contract-level reduction of terminated paths.
//!
//! Ingesting results is order independent: counters are sums, sets are
//! unions, and every list is sorted when the report is finished.

use crate::{
    engine::{ExecutionResult, ExitCode, Fault, Outcome, TargetedParameters},
    program::{BlockId, Contract, Opcode},
    symbolic::Word,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to access report file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize report")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct WriteRecord {
    pub account: String,
    pub slot: String,
    pub value: String,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct CallSummary {
    pub kind: Opcode,
    pub caller: String,
    pub target: String,
    pub value: String,
    pub modeled: bool,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct EventSummary {
    pub emitter: String,
    pub topics: Vec<String>,
}

/// Serializable form of one terminated path.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct PathRecord {
    pub selector: Option<u32>,
    pub outcome: Outcome,
    pub block: BlockId,
    pub pc: Option<u64>,
    /// Path constraints, oldest first.
    pub constraints: Vec<String>,
    pub storage_writes: Vec<WriteRecord>,
    pub calls: Vec<CallSummary>,
    pub events: Vec<EventSummary>,
    pub trace: Vec<BlockId>,
    pub gas_used: u64,
    pub steps: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case: Option<BTreeMap<String, Word>>,
}

impl From<ExecutionResult> for PathRecord {
    fn from(result: ExecutionResult) -> Self {
        Self {
            selector: result.selector,
            outcome: result.outcome,
            block: result.block,
            pc: result.pc,
            constraints: result
                .constraints
                .to_vec()
                .iter()
                .map(ToString::to_string)
                .collect(),
            storage_writes: result
                .storage_writes
                .iter()
                .map(|w| WriteRecord {
                    account: w.account.to_string(),
                    slot: w.slot.to_string(),
                    value: w.value.to_string(),
                })
                .collect(),
            calls: result
                .calls
                .iter()
                .map(|c| CallSummary {
                    kind: c.kind,
                    caller: c.caller.to_string(),
                    target: c.target.to_string(),
                    value: c.value.to_string(),
                    modeled: c.modeled,
                })
                .collect(),
            events: result
                .events
                .iter()
                .map(|e| EventSummary {
                    emitter: e.emitter.to_string(),
                    topics: e.topics.iter().map(ToString::to_string).collect(),
                })
                .collect(),
            trace: result.trace,
            gas_used: result.gas_used,
            steps: result.steps,
            test_case: result
                .test_case
                .map(|a| a.into_iter().map(|(k, v)| (k.to_string(), v)).collect()),
        }
    }
}

/// A write to one slot, with the constraints guarding it.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct SlotWrite {
    pub account: String,
    pub value: String,
    pub guard: Vec<String>,
    pub outcome: Outcome,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SlotSummary {
    /// The slot is one of the targeted storage slots.
    pub targeted: bool,
    pub writes: Vec<SlotWrite>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContractReport {
    pub contract: String,
    pub address: Option<Word>,
    pub bytecode_hash: Option<Word>,
    pub paths: u64,
    /// Terminated paths per outcome label.
    pub outcomes: BTreeMap<String, u64>,
    /// Blocks in which paths that were not pruned ended.
    pub reachable_blocks: BTreeSet<BlockId>,
    /// Write summary keyed by slot expression.
    pub storage: BTreeMap<String, SlotSummary>,
    pub cutoffs: u64,
    pub pruned: u64,
    /// Paths ending in the designated invalid instruction.
    pub assertion_failures: u64,
    pub solver_unknowns: u64,
    /// No path finished on its own, but some were cut off.
    pub inconclusive: bool,
    pub paths_detail: Vec<PathRecord>,
}

impl ContractReport {
    pub fn live_paths(&self) -> u64 {
        self.paths - self.cutoffs - self.pruned
    }

    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let file = File::open(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn store(&self, path: &Path) -> Result<(), ReportError> {
        let file = File::create(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::to_writer_pretty(BufWriter::new(file), self)?;

        Ok(())
    }
}

pub struct Aggregator {
    report: ContractReport,
    targeted_slots: BTreeSet<Word>,
}

impl Aggregator {
    pub fn new(contract: &Contract, targets: &TargetedParameters) -> Self {
        Self {
            report: ContractReport {
                contract: contract.name().to_string(),
                address: contract.address(),
                bytecode_hash: contract.program().bytecode_hash,
                paths: 0,
                outcomes: BTreeMap::new(),
                reachable_blocks: BTreeSet::new(),
                storage: BTreeMap::new(),
                cutoffs: 0,
                pruned: 0,
                assertion_failures: 0,
                solver_unknowns: 0,
                inconclusive: false,
                paths_detail: Vec::new(),
            },
            targeted_slots: targets.storage_slots.clone(),
        }
    }

    pub fn ingest(&mut self, result: ExecutionResult) {
        let report = &mut self.report;
        let outcome = result.outcome;

        report.paths += 1;
        *report.outcomes.entry(outcome.to_string()).or_insert(0) += 1;

        match outcome {
            Outcome::Cutoff(_) => report.cutoffs += 1,
            Outcome::Pruned => report.pruned += 1,
            Outcome::Exception(Fault::InvalidOpcode) => report.assertion_failures += 1,
            _ => {}
        }

        if outcome != Outcome::Pruned {
            report.reachable_blocks.insert(result.block);
        }

        let guard = result
            .constraints
            .to_vec()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        for write in result.storage_writes.iter() {
            let targeted = write
                .slot
                .as_const()
                .is_some_and(|s| self.targeted_slots.contains(&s));

            let summary = report.storage.entry(write.slot.to_string()).or_default();
            summary.targeted |= targeted;
            summary.writes.push(SlotWrite {
                account: write.account.to_string(),
                value: write.value.to_string(),
                guard: guard.clone(),
                outcome,
            });
        }

        report.paths_detail.push(PathRecord::from(result));
    }

    pub fn count_unknown_queries(&mut self, unknown: u64) {
        self.report.solver_unknowns += unknown;
    }

    /// Combines the partial reports of two disjoint sets of paths.
    pub fn merge(mut self, other: Aggregator) -> Aggregator {
        let (report, other) = (&mut self.report, other.report);

        report.paths += other.paths;
        other.outcomes.into_iter().for_each(|(label, count)| {
            *report.outcomes.entry(label).or_insert(0) += count;
        });
        report.reachable_blocks.extend(other.reachable_blocks);
        other.storage.into_iter().for_each(|(slot, summary)| {
            let merged = report.storage.entry(slot).or_default();
            merged.targeted |= summary.targeted;
            merged.writes.extend(summary.writes);
        });
        report.cutoffs += other.cutoffs;
        report.pruned += other.pruned;
        report.assertion_failures += other.assertion_failures;
        report.solver_unknowns += other.solver_unknowns;
        report.paths_detail.extend(other.paths_detail);

        self
    }

    pub fn finish(mut self) -> ContractReport {
        let report = &mut self.report;

        report.paths_detail.sort();
        report
            .storage
            .values_mut()
            .for_each(|summary| summary.writes.sort());
        report.inconclusive = report.live_paths() == 0 && report.cutoffs > 0;

        info!(
            "{}: {} paths, {} cut off, {} pruned, {} assertion failures",
            report.contract, report.paths, report.cutoffs, report.pruned, report.assertion_failures
        );

        self.report
    }
}

/// Reports of all analyzed contracts of a run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub contracts: BTreeMap<String, ContractReport>,
    pub exit_code: ExitCode,
}

impl RunReport {
    pub fn new(contracts: BTreeMap<String, ContractReport>, exit_code: ExitCode) -> Self {
        Self {
            contracts,
            exit_code,
        }
    }

    /// Report of a run that was aborted during setup.
    pub fn failed(exit_code: ExitCode) -> Self {
        Self::new(BTreeMap::new(), exit_code)
    }

    pub fn is_inconclusive(&self) -> bool {
        self.contracts.values().any(|c| c.inconclusive)
    }

    /// Writes `<directory>/<contract>.json` for every contract.
    pub fn persist(&self, directory: &Path) -> Result<(), ReportError> {
        self.contracts.iter().try_for_each(|(name, report)| {
            let path = directory.join(format!("{}.json", name));

            info!("storing report of {} in {:?}", name, path);

            report.store(&path)
        })
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constraints::PathConstraintSet,
        engine::{result::StorageWrite, Bound},
        program::{Block, Exit, Instruction, Program},
        symbolic::Expr,
    };
    use std::sync::Arc;

    fn contract() -> Contract {
        Contract::new(Program {
            name: "Vault".to_string(),
            address: None,
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
            functions: vec![],
        })
        .expect("valid program")
    }

    fn result(outcome: Outcome, block: BlockId, slot: u64) -> ExecutionResult {
        let constraints =
            PathConstraintSet::new().assert(Expr::eq(Expr::input("x"), Expr::from_u64(block)));

        ExecutionResult {
            contract: Arc::from("Vault"),
            selector: None,
            outcome,
            block,
            pc: Some(0),
            constraints,
            storage_writes: vec![StorageWrite {
                account: Arc::from("Vault"),
                slot: Expr::from_u64(slot),
                value: Expr::input("x"),
            }],
            calls: vec![],
            events: vec![],
            trace: vec![0, block],
            gas_used: 3,
            steps: 1,
            test_case: None,
        }
    }

    fn targets() -> TargetedParameters {
        TargetedParameters {
            selectors: BTreeSet::new(),
            storage_slots: [Word::from(1_u64)].into_iter().collect(),
        }
    }

    #[test]
    fn ingestion_order_does_not_matter() {
        let results = vec![
            result(Outcome::Stop, 1, 1),
            result(Outcome::Cutoff(Bound::Loop), 2, 2),
            result(Outcome::Return, 3, 1),
        ];

        let mut forward = Aggregator::new(&contract(), &targets());
        results.iter().cloned().for_each(|r| forward.ingest(r));

        let mut backward = Aggregator::new(&contract(), &targets());
        results.iter().rev().cloned().for_each(|r| backward.ingest(r));

        assert_eq!(forward.finish(), backward.finish());
    }

    #[test]
    fn merging_partial_reports_equals_ingesting_everything() {
        let mut left = Aggregator::new(&contract(), &targets());
        left.ingest(result(Outcome::Stop, 1, 1));

        let mut right = Aggregator::new(&contract(), &targets());
        right.ingest(result(Outcome::Pruned, 2, 2));

        let mut all = Aggregator::new(&contract(), &targets());
        all.ingest(result(Outcome::Pruned, 2, 2));
        all.ingest(result(Outcome::Stop, 1, 1));

        assert_eq!(left.merge(right).finish(), all.finish());
    }

    #[test]
    fn storage_summary_flags_targeted_slots() {
        let mut aggregator = Aggregator::new(&contract(), &targets());
        aggregator.ingest(result(Outcome::Stop, 1, 1));
        aggregator.ingest(result(Outcome::Stop, 2, 2));

        let report = aggregator.finish();

        assert!(report.storage["0x1"].targeted);
        assert!(!report.storage["0x2"].targeted);
        assert_eq!(report.storage["0x1"].writes[0].guard, vec!["(eq 0x1 x)"]);
    }

    #[test]
    fn only_cutoffs_make_a_report_inconclusive() {
        let mut aggregator = Aggregator::new(&contract(), &targets());
        aggregator.ingest(result(Outcome::Cutoff(Bound::Timeout), 1, 1));

        let report = aggregator.finish();

        assert!(report.inconclusive);
        assert_eq!(report.live_paths(), 0);
    }
}
