use crate::{
    constraints::QueryStatistics,
    util::{mean, median_of_sorted, mode},
};
use itertools::Itertools;
use std::{collections::LinkedList, convert::TryFrom, fmt::Display, time::Duration};

#[derive(Debug, Clone, Copy)]
struct Path {
    pub executed_instructions: u64,
    pub symbolic_branches: u64,
    pub cut_off: bool,
}

/// Statistics of one exploration, merged across workers.
#[derive(Debug, Clone)]
pub struct Profiler {
    executed_instructions: u64,
    execution_time: Option<Duration>,
    taken_branches: u64,
    fallthrough_branches: u64,
    forks: u64,
    pruned_successors: u64,
    queries: QueryStatistics,
    symbolic_branches: u64,
    solver_times: LinkedList<Duration>,
    path_depths: LinkedList<Path>,
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Profiler {
    pub fn new() -> Self {
        Self {
            executed_instructions: 0,
            execution_time: None,
            taken_branches: 0,
            fallthrough_branches: 0,
            forks: 0,
            pruned_successors: 0,
            queries: QueryStatistics::default(),
            symbolic_branches: 0,
            solver_times: LinkedList::new(),
            path_depths: LinkedList::new(),
        }
    }

    pub fn merge_with(&mut self, rhs: &mut Self) {
        self.executed_instructions += rhs.executed_instructions;
        assert!(
            self.execution_time.is_none() && rhs.execution_time.is_none(),
            "can not merge execution times in profile"
        );
        self.taken_branches += rhs.taken_branches;
        self.fallthrough_branches += rhs.fallthrough_branches;
        self.forks += rhs.forks;
        self.pruned_successors += rhs.pruned_successors;
        self.queries.sat += rhs.queries.sat;
        self.queries.unsat += rhs.queries.unsat;
        self.queries.unknown += rhs.queries.unknown;
        self.queries.memoized += rhs.queries.memoized;
        self.solver_times.append(&mut rhs.solver_times);
        self.path_depths.append(&mut rhs.path_depths);
    }

    pub fn instruction_executed(&mut self) {
        self.executed_instructions += 1;
    }

    /// A concrete branch decision.
    pub fn took_branch(&mut self, taken: bool) {
        if taken {
            self.taken_branches += 1;
        } else {
            self.fallthrough_branches += 1;
        }
    }

    pub fn branch_with_symbolic_condition(&mut self) {
        self.symbolic_branches += 1;
    }

    pub fn forked(&mut self, children: usize) {
        self.forks += u64::try_from(children.saturating_sub(1)).unwrap_or(0);
    }

    pub fn pruned_successor(&mut self) {
        self.pruned_successors += 1;
    }

    pub fn solver_statistics(&mut self, queries: QueryStatistics, times: Vec<Duration>) {
        self.queries.sat += queries.sat;
        self.queries.unsat += queries.unsat;
        self.queries.unknown += queries.unknown;
        self.queries.memoized += queries.memoized;
        self.solver_times.extend(times);
    }

    pub fn exploration_took(&mut self, time: Duration) {
        self.execution_time = Some(time);
    }

    pub fn end_of_path(&mut self, executed_instructions: u64, cut_off: bool) {
        self.path_depths.push_back(Path {
            executed_instructions,
            symbolic_branches: self.symbolic_branches,
            cut_off,
        });

        self.symbolic_branches = 0;
    }

    pub fn executed_instructions(&self) -> u64 {
        self.executed_instructions
    }

    pub fn unknown_queries(&self) -> u64 {
        self.queries.unknown
    }
}

fn summary(f: &mut std::fmt::Formatter<'_>, label: &str, sorted: &[u64]) -> std::fmt::Result {
    if sorted.is_empty() {
        writeln!(f, "  {:<19} min: 0  max: 0  mean: 0  median: 0  mode: 0", label)
    } else {
        writeln!(
            f,
            "  {:<19} min: {}  max: {}  mean: {}  median: {}  mode: {}",
            label,
            sorted[0],
            sorted[sorted.len() - 1],
            mean(sorted).expect("sorted has at least one element"),
            median_of_sorted(sorted).expect("sorted has at least one element"),
            mode(sorted).expect("sorted has at least one element")
        )
    }
}

impl Display for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total_branches = self.taken_branches + self.fallthrough_branches;
        let total_queries = self.queries.sat + self.queries.unsat + self.queries.unknown;

        fn percent(total: u64, part: u64) -> f64 {
            if total == 0 {
                0.0
            } else {
                (part as f64) / (total as f64) * 100.0
            }
        }

        fn to_duration(nanos: u128) -> Duration {
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }

        writeln!(f, "instructions:     {}", self.executed_instructions)?;

        if let Some(execution_time) = self.execution_time {
            let solver_time: Duration = self.solver_times.iter().sum();
            let exploration = execution_time.saturating_sub(solver_time);
            let total = execution_time.as_nanos().max(1) as f64;

            writeln!(
                f,
                "execution time:   path exploration: {:?}({:.2}%)  solver: {:?}({:.2}%)",
                exploration,
                exploration.as_nanos() as f64 / total * 100.0,
                solver_time,
                solver_time.as_nanos() as f64 / total * 100.0
            )?;
        }

        writeln!(
            f,
            "branch decisions: taken: {}({:.2}%)  fallthrough: {}({:.2}%)",
            self.taken_branches,
            percent(total_branches, self.taken_branches),
            self.fallthrough_branches,
            percent(total_branches, self.fallthrough_branches),
        )?;

        let cut_off = self.path_depths.iter().filter(|p| p.cut_off).count() as u64;
        let finished = self.path_depths.len() as u64 - cut_off;

        writeln!(
            f,
            "paths:            forks: {}  finished: {}  cut off: {}  pruned successors: {}",
            self.forks, finished, cut_off, self.pruned_successors
        )?;

        let instructions = self
            .path_depths
            .iter()
            .map(|path| path.executed_instructions)
            .sorted()
            .collect_vec();
        summary(f, "instructions:", &instructions)?;

        let branches = self
            .path_depths
            .iter()
            .map(|path| path.symbolic_branches)
            .sorted()
            .collect_vec();
        summary(f, "symbolic branches:", &branches)?;

        writeln!(
            f,
            "SMT queries:      {}  memoized: {}",
            total_queries, self.queries.memoized
        )?;
        writeln!(
            f,
            "  results:        sat: {}({:.2}%)  unsat: {}({:.2}%)  unknown: {}({:.2}%)",
            self.queries.sat,
            percent(total_queries, self.queries.sat),
            self.queries.unsat,
            percent(total_queries, self.queries.unsat),
            self.queries.unknown,
            percent(total_queries, self.queries.unknown),
        )?;

        if self.solver_times.is_empty() {
            write!(
                f,
                "  took:           min: 0s  max: 0s  mean: 0s  median: 0s  mode: 0s"
            )
        } else {
            let sorted = self
                .solver_times
                .iter()
                .map(|t| t.as_nanos())
                .sorted()
                .collect_vec();

            write!(
                f,
                "  took:           min: {:?}  max: {:?}  mean: {:?}  median: {:?}  mode: {:?}",
                to_duration(sorted[0]),
                to_duration(sorted[sorted.len() - 1]),
                to_duration(mean(&sorted).expect("sorted has at least one element")),
                to_duration(median_of_sorted(&sorted).expect("sorted has at least one element")),
                to_duration(*mode(&sorted).expect("sorted has at least one element"))
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_profiles_add_up() {
        let mut left = Profiler::new();
        left.instruction_executed();
        left.end_of_path(1, false);

        let mut right = Profiler::new();
        right.instruction_executed();
        right.instruction_executed();
        right.branch_with_symbolic_condition();
        right.end_of_path(2, true);

        left.merge_with(&mut right);

        assert_eq!(left.executed_instructions(), 3);
        assert!(left.to_string().contains("finished: 1  cut off: 1"));
    }
}
