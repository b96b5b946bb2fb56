//! Work-stealing exploration on a fixed pool of workers.
//!
//! Roots go to a shared injector. Children of a fork stay on the forking
//! worker's LIFO deque, so every worker runs depth first, and idle workers
//! steal siblings from the others. Each worker owns its solver session.

use super::{
    explorer::Explorer,
    profiler::Profiler,
    result::{Bound, ExecutionResult},
    watchdog::Cancellation,
    Env, Path,
};
use crate::solver::Solver;
use crossbeam::deque::{Injector, Stealer, Worker};
use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};

fn find_task<T>(local: &Worker<T>, global: &Injector<T>, stealers: &[Stealer<T>]) -> Option<T> {
    local.pop().or_else(|| {
        std::iter::repeat_with(|| {
            global
                .steal_batch_and_pop(local)
                .or_else(|| stealers.iter().map(|s| s.steal()).collect())
        })
        .find(|s| !s.is_retry())
        .and_then(|s| s.success())
    })
}

pub fn explore<S: Solver>(
    env: &Env,
    roots: Vec<Path>,
    cancellation: &Cancellation,
) -> (Vec<ExecutionResult>, Profiler) {
    let workers = env.config.workers.max(1);

    let global = Injector::new();
    // paths queued or running, the pool stops when it drops to zero
    let pending = AtomicUsize::new(roots.len());
    roots.into_iter().for_each(|root| global.push(root));

    let queues = (0..workers).map(|_| Worker::new_lifo()).collect::<Vec<_>>();
    let stealers = queues.iter().map(Worker::stealer).collect::<Vec<_>>();

    let outputs = crossbeam::thread::scope(|scope| {
        let handles = queues
            .into_iter()
            .enumerate()
            .map(|(id, queue)| {
                let (global, stealers, pending) = (&global, &stealers, &pending);

                scope.spawn(move |_| {
                    let solver = S::new(env.config.solver_timeout());
                    let mut explorer = Explorer::new(env, solver, cancellation);

                    loop {
                        let path = match find_task(&queue, global, stealers) {
                            Some(path) => path,
                            None if pending.load(Ordering::Acquire) == 0 => break,
                            // busy workers cut off the paths they still hold
                            None if cancellation.is_cancelled() => break,
                            None => {
                                std::thread::yield_now();
                                continue;
                            }
                        };

                        if cancellation.is_cancelled() {
                            explorer.terminate(path, Bound::Timeout.into());
                        } else if pending.load(Ordering::Acquire) > env.config.max_pending_paths {
                            explorer.terminate(path, Bound::QueueSaturation.into());
                        } else {
                            let children = explorer.run(path);

                            pending.fetch_add(children.len(), Ordering::AcqRel);
                            children.into_iter().rev().for_each(|child| queue.push(child));
                        }

                        pending.fetch_sub(1, Ordering::AcqRel);
                    }

                    debug!("worker {} ran out of paths", id);

                    explorer.finish()
                })
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|handle| handle.join().expect("explorer workers do not panic"))
            .collect::<Vec<_>>()
    })
    .expect("explorer workers do not panic");

    let mut results = Vec::new();
    let mut profiler = Profiler::new();

    for (mut worker_results, mut profile) in outputs {
        results.append(&mut worker_results);
        profiler.merge_with(&mut profile);
    }

    (results, profiler)
}
