use crate::{
    constraints::PathConstraintSet,
    program::{BlockId, Opcode},
    symbolic::{Assignment, SymbolicValue},
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use strum::{Display, EnumIter, IntoStaticStr};

/// Faults that end a path like an exceptional halt of the EVM.
#[derive(
    Clone, Copy, Debug, Display, EnumIter, Eq, Hash, IntoStaticStr, Ord, PartialEq, PartialOrd,
    Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    StackUnderflow,
    StackOverflow,
    InvalidJump,
    InvalidOpcode,
    StaticStateChange,
}

/// Configured bounds that can cut a path off.
#[derive(
    Clone, Copy, Debug, Display, EnumIter, Eq, Hash, IntoStaticStr, Ord, PartialEq, PartialOrd,
    Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Depth,
    Loop,
    Gas,
    CallDepth,
    Timeout,
    QueueSaturation,
}

/// Terminal classification of a path.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Stop,
    Return,
    Revert,
    SelfDestruct,
    Exception(Fault),
    Cutoff(Bound),
    /// No successor of a branch was satisfiable.
    Pruned,
}

impl Outcome {
    pub fn is_cutoff(&self) -> bool {
        matches!(self, Outcome::Cutoff(_))
    }

    /// Ended by the program itself, as opposed to a bound or pruning.
    pub fn is_live(&self) -> bool {
        !matches!(self, Outcome::Cutoff(_) | Outcome::Pruned)
    }

    /// State changes of the path survive.
    pub fn commits(&self) -> bool {
        matches!(self, Outcome::Stop | Outcome::Return | Outcome::SelfDestruct)
    }
}

impl From<Fault> for Outcome {
    fn from(fault: Fault) -> Self {
        Outcome::Exception(fault)
    }
}

impl From<Bound> for Outcome {
    fn from(bound: Bound) -> Self {
        Outcome::Cutoff(bound)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Stop => write!(f, "stop"),
            Outcome::Return => write!(f, "return"),
            Outcome::Revert => write!(f, "revert"),
            Outcome::SelfDestruct => write!(f, "selfdestruct"),
            Outcome::Exception(fault) => write!(f, "exception:{}", fault),
            Outcome::Cutoff(bound) => write!(f, "cutoff:{}", bound),
            Outcome::Pruned => write!(f, "pruned"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageWrite {
    pub account: Arc<str>,
    pub slot: SymbolicValue,
    pub value: SymbolicValue,
}

#[derive(Clone, Debug)]
pub struct CallRecord {
    pub kind: Opcode,
    pub caller: Arc<str>,
    pub target: SymbolicValue,
    pub value: SymbolicValue,
    /// Callee executed nested instead of being modeled by fresh inputs.
    pub modeled: bool,
}

#[derive(Clone, Debug)]
pub struct EventRecord {
    pub emitter: Arc<str>,
    pub topics: Vec<SymbolicValue>,
}

/// Everything observed on one terminated path.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub contract: Arc<str>,
    pub selector: Option<u32>,
    pub outcome: Outcome,
    /// Block the path was in when it ended.
    pub block: BlockId,
    pub pc: Option<u64>,
    pub constraints: PathConstraintSet,
    /// Final storage delta. Empty for paths whose changes are rolled back.
    pub storage_writes: Vec<StorageWrite>,
    pub calls: Vec<CallRecord>,
    pub events: Vec<EventRecord>,
    pub trace: Vec<BlockId>,
    pub gas_used: u64,
    pub steps: u64,
    pub test_case: Option<Assignment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(Outcome::from(Fault::InvalidJump).to_string(), "exception:invalid_jump");
        assert_eq!(Outcome::from(Bound::CallDepth).to_string(), "cutoff:call_depth");
        assert!(!Outcome::Revert.commits());
        assert!(Outcome::Revert.is_live());
        assert!(!Outcome::Cutoff(Bound::Loop).is_live());
    }
}
