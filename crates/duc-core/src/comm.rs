//! Message-passing collectives for worker teams.
//!
//! The ADMM coordinator is written single-program multiple-data: every
//! worker owns one zone and advances in lockstep through barriers and
//! all-reduce operations. [`Communicator`] is the minimum collective
//! surface that model needs; [`LocalCommunicator`] implements it for a team
//! of threads inside one process, and [`SoloCommunicator`] is the trivial
//! single-worker instance used by the centralized algorithm variants.
//!
//! Every worker must reach every collective in the same order. A length
//! mismatch between the buffers handed to the same reduction is a protocol
//! violation and panics rather than silently corrupting the exchange.

use std::sync::{Arc, Barrier, Condvar, Mutex};

/// Collective operations required by the distributed coordinator.
pub trait Communicator: Send + Sync {
    /// Number of workers in the team.
    fn size(&self) -> usize;

    /// This worker's 0-based rank.
    fn rank(&self) -> usize;

    /// Block until every worker has arrived.
    fn barrier(&self);

    /// Elementwise sum across all workers; every worker receives the total.
    fn all_reduce_sum_in_place(&self, buf: &mut [f64]);

    /// Elementwise max across all workers; every worker receives the max.
    fn all_reduce_max_in_place(&self, buf: &mut [f64]);

    /// Sum a scalar across all workers.
    fn all_reduce_sum(&self, value: f64) -> f64 {
        let mut buf = [value];
        self.all_reduce_sum_in_place(&mut buf);
        buf[0]
    }

    /// Max of a scalar across all workers.
    fn all_reduce_max(&self, value: f64) -> f64 {
        let mut buf = [value];
        self.all_reduce_max_in_place(&mut buf);
        buf[0]
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ReduceOp {
    Sum,
    Max,
}

struct ReduceState {
    acc: Vec<f64>,
    result: Vec<f64>,
    pending: usize,
    generation: u64,
}

struct Shared {
    size: usize,
    barrier: Barrier,
    state: Mutex<ReduceState>,
    done: Condvar,
}

/// In-process communicator for a team of worker threads.
///
/// Reductions are generation-counted: the last contributor publishes the
/// combined vector and bumps the generation, waiters copy it out. A worker
/// cannot overwrite a published result before every teammate has read it,
/// because doing so would require that teammate to have entered the next
/// reduction already.
pub struct LocalCommunicator {
    shared: Arc<Shared>,
    rank: usize,
}

impl LocalCommunicator {
    /// Create a connected team of `size` communicators, one per worker.
    pub fn team(size: usize) -> Vec<LocalCommunicator> {
        assert!(size >= 1, "a worker team needs at least one member");
        let shared = Arc::new(Shared {
            size,
            barrier: Barrier::new(size),
            state: Mutex::new(ReduceState {
                acc: Vec::new(),
                result: Vec::new(),
                pending: 0,
                generation: 0,
            }),
            done: Condvar::new(),
        });
        (0..size)
            .map(|rank| LocalCommunicator {
                shared: Arc::clone(&shared),
                rank,
            })
            .collect()
    }

    fn all_reduce(&self, op: ReduceOp, buf: &mut [f64]) {
        let shared = &self.shared;
        let mut st = shared.state.lock().expect("communicator poisoned");
        if st.pending == 0 {
            st.acc.clear();
            st.acc.extend_from_slice(buf);
        } else {
            assert_eq!(
                st.acc.len(),
                buf.len(),
                "collective called with mismatched buffer lengths"
            );
            for (a, &v) in st.acc.iter_mut().zip(buf.iter()) {
                match op {
                    ReduceOp::Sum => *a += v,
                    ReduceOp::Max => *a = a.max(v),
                }
            }
        }
        st.pending += 1;
        if st.pending == shared.size {
            st.result = std::mem::take(&mut st.acc);
            st.pending = 0;
            st.generation = st.generation.wrapping_add(1);
            buf.copy_from_slice(&st.result);
            shared.done.notify_all();
        } else {
            let entered = st.generation;
            while st.generation == entered {
                st = shared.done.wait(st).expect("communicator poisoned");
            }
            buf.copy_from_slice(&st.result);
        }
    }
}

impl Communicator for LocalCommunicator {
    fn size(&self) -> usize {
        self.shared.size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn all_reduce_sum_in_place(&self, buf: &mut [f64]) {
        self.all_reduce(ReduceOp::Sum, buf);
    }

    fn all_reduce_max_in_place(&self, buf: &mut [f64]) {
        self.all_reduce(ReduceOp::Max, buf);
    }
}

/// Single-worker communicator; every collective is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoloCommunicator;

impl Communicator for SoloCommunicator {
    fn size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn barrier(&self) {}

    fn all_reduce_sum_in_place(&self, _buf: &mut [f64]) {}

    fn all_reduce_max_in_place(&self, _buf: &mut [f64]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn solo_is_identity() {
        let comm = SoloCommunicator;
        assert_eq!(comm.all_reduce_sum(3.5), 3.5);
        assert_eq!(comm.all_reduce_max(-1.0), -1.0);
    }

    #[test]
    fn team_sums_and_maxes() {
        let team = LocalCommunicator::team(4);
        thread::scope(|scope| {
            for comm in &team {
                scope.spawn(move || {
                    let rank = comm.rank() as f64;
                    let total = comm.all_reduce_sum(rank);
                    assert_eq!(total, 0.0 + 1.0 + 2.0 + 3.0);
                    let max = comm.all_reduce_max(rank);
                    assert_eq!(max, 3.0);
                });
            }
        });
    }

    #[test]
    fn repeated_vector_reductions_stay_in_sync() {
        let team = LocalCommunicator::team(3);
        thread::scope(|scope| {
            for comm in &team {
                scope.spawn(move || {
                    for round in 0..50u32 {
                        let mut buf = vec![comm.rank() as f64, f64::from(round)];
                        comm.all_reduce_sum_in_place(&mut buf);
                        assert_eq!(buf[0], 3.0);
                        assert_eq!(buf[1], 3.0 * f64::from(round));
                        comm.barrier();
                    }
                });
            }
        });
    }
}
