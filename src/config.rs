use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use strum::{Display, EnumString, EnumVariantNames, IntoStaticStr};

pub mod defaults {
    pub const DEPTH_LIMIT: u64 = 100;
    pub const LOOP_LIMIT: u64 = 20;
    pub const GAS_LIMIT: u64 = 400_000_000;
    pub const GLOBAL_TIMEOUT_MS: u64 = 300_000;
    pub const GLOBAL_TIMEOUT_TEST_MS: u64 = 2_000;
    pub const SOLVER_TIMEOUT_MS: u64 = 100;
    pub const CALL_DEPTH_LIMIT: u64 = 1024;
    pub const MAX_PENDING_PATHS: usize = 100_000;
    pub const OUTPUT_DIR: &str = "./output/";
}

#[derive(
    Clone, Copy, Debug, Default, Display, EnumString, EnumVariantNames, Eq, IntoStaticStr, PartialEq,
    Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SolverBackend {
    /// Built-in interval and local search solver.
    #[default]
    Builtin,
    /// Decides nothing, every branch is kept.
    None,
    /// Requires the `z3` feature.
    Z3,
}

/// Bounds and switches of one analysis run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum instructions executed on one path.
    pub depth_limit: u64,
    /// Maximum re-entries of one block on one path.
    pub loop_limit: u64,
    /// Gas available to one path.
    pub gas_limit: u64,
    pub global_timeout_ms: u64,
    pub solver_timeout_ms: u64,
    pub call_depth_limit: u64,
    pub parallel: bool,
    pub workers: usize,
    /// Pending paths beyond this many are cut off.
    pub max_pending_paths: usize,
    pub solver: SolverBackend,
    /// Only these contracts are analyzed. Empty means all of them.
    pub target_contracts: Vec<String>,
    pub store_result: bool,
    pub output_dir: PathBuf,
    pub print_paths: bool,
    pub generate_test_cases: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            depth_limit: defaults::DEPTH_LIMIT,
            loop_limit: defaults::LOOP_LIMIT,
            gas_limit: defaults::GAS_LIMIT,
            global_timeout_ms: defaults::GLOBAL_TIMEOUT_MS,
            solver_timeout_ms: defaults::SOLVER_TIMEOUT_MS,
            call_depth_limit: defaults::CALL_DEPTH_LIMIT,
            parallel: false,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_pending_paths: defaults::MAX_PENDING_PATHS,
            solver: SolverBackend::default(),
            target_contracts: Vec::new(),
            store_result: false,
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
            print_paths: false,
            generate_test_cases: false,
        }
    }
}

impl Config {
    /// Defaults with the reduced global timeout used in test mode.
    pub fn for_tests() -> Self {
        Self {
            global_timeout_ms: defaults::GLOBAL_TIMEOUT_TEST_MS,
            ..Self::default()
        }
    }

    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.global_timeout_ms)
    }

    pub fn solver_timeout(&self) -> Duration {
        Duration::from_millis(self.solver_timeout_ms)
    }

    pub fn with_depth_limit(mut self, depth_limit: u64) -> Self {
        self.depth_limit = depth_limit;
        self
    }

    pub fn with_loop_limit(mut self, loop_limit: u64) -> Self {
        self.loop_limit = loop_limit;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_call_depth_limit(mut self, call_depth_limit: u64) -> Self {
        self.call_depth_limit = call_depth_limit;
        self
    }

    pub fn with_parallel(mut self, workers: usize) -> Self {
        self.parallel = true;
        self.workers = workers.max(1);
        self
    }

    pub fn with_solver(mut self, solver: SolverBackend) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_max_pending_paths(mut self, max_pending_paths: usize) -> Self {
        self.max_pending_paths = max_pending_paths;
        self
    }

    pub fn with_target_contracts(mut self, names: &[&str]) -> Self {
        self.target_contracts = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_test_cases(mut self) -> Self {
        self.generate_test_cases = true;
        self
    }

    pub fn storing_results_in(mut self, output_dir: PathBuf) -> Self {
        self.store_result = true;
        self.output_dir = output_dir;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"loop_limit": 3, "solver": "none"}"#).expect("valid json");

        assert_eq!(config.loop_limit, 3);
        assert_eq!(config.depth_limit, defaults::DEPTH_LIMIT);
        assert_eq!(config.solver, SolverBackend::None);
        assert_eq!(config.global_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_mode_shortens_the_global_timeout() {
        assert_eq!(Config::for_tests().global_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn sub_second_timeouts_keep_their_precision() {
        let config = Config::for_tests().with_global_timeout(Duration::from_millis(900));

        assert_eq!(config.global_timeout(), Duration::from_millis(900));
    }
}
