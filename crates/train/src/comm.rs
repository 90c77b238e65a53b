//! Collective-communication seams.
//!
//! The pipeline never talks to a communication backend directly; it goes
//! through two small traits. [`ShardGroup`] carries one raw token batch from
//! the source rank to every rank of a model-sharding group. [`ReplicaGroup`]
//! averages one scalar across the data-parallel replicas. Both are blocking
//! with no timeout: a stalled collective is the outer supervisor's problem.
//!
//! [`SingleProcess`] serves single-rank runs. The `Local*` groups are
//! in-process rendezvous implementations over `parking_lot` for single-node
//! SPMD tests; real multi-node collectives live behind the same traits,
//! outside this workspace.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use parking_lot::{Condvar, Mutex};

// ── TokenFrame ──────────────────────────────────────────────────────────────

/// The flat i64 payload carried through a broadcast: token ids plus the
/// `(batch, width)` shape. Integer data, so "bit-identical on every rank"
/// reduces to plain equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFrame {
    data: Vec<i64>,
    rows: usize,
    cols: usize,
}

impl TokenFrame {
    pub fn from_tensor(input_ids: &Tensor) -> Result<Self> {
        let (rows, cols) = input_ids.dims2()?;
        let data = input_ids.flatten_all()?.to_vec1::<i64>()?;
        Ok(Self { data, rows, cols })
    }

    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_vec(
            self.data.clone(),
            (self.rows, self.cols),
            device,
        )?)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

// ── Traits ──────────────────────────────────────────────────────────────────

/// One model-sharding group: every rank must observe the identical raw token
/// batch for a given step.
pub trait ShardGroup {
    fn rank(&self) -> usize;
    fn world_size(&self) -> usize;
    /// Whether this rank is the authoritative data source of the group.
    fn is_source(&self) -> bool;
    /// Broadcast one frame from the source rank to every rank. Non-source
    /// ranks pass `None`; a frame they do pass is ignored. Blocks until the
    /// whole group has the frame.
    fn broadcast(&self, frame: Option<TokenFrame>) -> Result<TokenFrame>;
}

/// One data-parallel replica group: scalar all-reduce for loss logging.
pub trait ReplicaGroup: Send + Sync {
    fn world_size(&self) -> usize;
    /// Contribute `value` and block until every replica has contributed;
    /// every rank returns the same unweighted mean.
    fn all_reduce_mean(&self, value: f64) -> Result<f64>;
}

// ── SingleProcess ───────────────────────────────────────────────────────────

/// World size 1: the sole rank is its own source and replica set, so both
/// collectives are identities.
pub struct SingleProcess;

impl ShardGroup for SingleProcess {
    fn rank(&self) -> usize {
        0
    }
    fn world_size(&self) -> usize {
        1
    }
    fn is_source(&self) -> bool {
        true
    }
    fn broadcast(&self, frame: Option<TokenFrame>) -> Result<TokenFrame> {
        frame.ok_or_else(|| {
            anyhow!("single-process broadcast without a frame: the sole rank is the data source")
        })
    }
}

impl ReplicaGroup for SingleProcess {
    fn world_size(&self) -> usize {
        1
    }
    fn all_reduce_mean(&self, value: f64) -> Result<f64> {
        Ok(value)
    }
}

// ── LocalShardGroup ─────────────────────────────────────────────────────────

struct BroadcastSlot {
    frame: Option<TokenFrame>,
    /// Completed broadcast rounds.
    generation: u64,
    taken: usize,
}

struct ShardShared {
    slot: Mutex<BroadcastSlot>,
    cond: Condvar,
    world: usize,
    source: usize,
}

/// One rank's handle onto an in-process sharding group.
///
/// Round `g` proceeds in two phases under the shared lock: the source waits
/// until round `g-1` has drained, publishes its frame, then every rank
/// (source included) takes a copy; the last taker clears the slot and bumps
/// the generation. Each handle belongs to one thread.
pub struct LocalShardGroup {
    shared: Arc<ShardShared>,
    rank: usize,
    rounds: Cell<u64>,
}

impl LocalShardGroup {
    /// Create the `world_size` handles of one group, rank `source_rank` as
    /// the data source.
    pub fn create(world_size: usize, source_rank: usize) -> Vec<LocalShardGroup> {
        assert!(world_size > 0 && source_rank < world_size);
        let shared = Arc::new(ShardShared {
            slot: Mutex::new(BroadcastSlot {
                frame: None,
                generation: 0,
                taken: 0,
            }),
            cond: Condvar::new(),
            world: world_size,
            source: source_rank,
        });
        (0..world_size)
            .map(|rank| LocalShardGroup {
                shared: Arc::clone(&shared),
                rank,
                rounds: Cell::new(0),
            })
            .collect()
    }
}

impl ShardGroup for LocalShardGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.shared.world
    }

    fn is_source(&self) -> bool {
        self.rank == self.shared.source
    }

    fn broadcast(&self, frame: Option<TokenFrame>) -> Result<TokenFrame> {
        let round = self.rounds.get();
        self.rounds.set(round + 1);

        let shared = &self.shared;
        let mut slot = shared.slot.lock();
        if self.is_source() {
            let frame = frame.ok_or_else(|| {
                anyhow!("source rank {} entered broadcast without a raw batch", self.rank)
            })?;
            while slot.generation != round || slot.frame.is_some() {
                shared.cond.wait(&mut slot);
            }
            slot.frame = Some(frame);
            shared.cond.notify_all();
        }

        while slot.generation != round || slot.frame.is_none() {
            shared.cond.wait(&mut slot);
        }
        let out = slot
            .frame
            .clone()
            .ok_or_else(|| anyhow!("broadcast slot emptied mid-round"))?;
        slot.taken += 1;
        if slot.taken == shared.world {
            slot.frame = None;
            slot.taken = 0;
            slot.generation = round + 1;
            shared.cond.notify_all();
        }
        Ok(out)
    }
}

// ── LocalReplicaGroup ───────────────────────────────────────────────────────

struct ReduceSlot {
    sum: f64,
    arrived: usize,
    mean: f64,
    generation: u64,
}

struct ReplicaShared {
    slot: Mutex<ReduceSlot>,
    cond: Condvar,
    world: usize,
}

/// One rank's handle onto an in-process data-parallel group. Each call
/// contributes to the current round; the last arrival computes the mean and
/// releases everyone.
pub struct LocalReplicaGroup {
    shared: Arc<ReplicaShared>,
    rounds: AtomicU64,
}

impl LocalReplicaGroup {
    pub fn create(world_size: usize) -> Vec<LocalReplicaGroup> {
        assert!(world_size > 0);
        let shared = Arc::new(ReplicaShared {
            slot: Mutex::new(ReduceSlot {
                sum: 0.0,
                arrived: 0,
                mean: 0.0,
                generation: 0,
            }),
            cond: Condvar::new(),
            world: world_size,
        });
        (0..world_size)
            .map(|_| LocalReplicaGroup {
                shared: Arc::clone(&shared),
                rounds: AtomicU64::new(0),
            })
            .collect()
    }
}

impl ReplicaGroup for LocalReplicaGroup {
    fn world_size(&self) -> usize {
        self.shared.world
    }

    fn all_reduce_mean(&self, value: f64) -> Result<f64> {
        let round = self.rounds.fetch_add(1, Ordering::Relaxed);
        let shared = &self.shared;
        let mut slot = shared.slot.lock();
        while slot.generation != round {
            shared.cond.wait(&mut slot);
        }
        slot.sum += value;
        slot.arrived += 1;
        if slot.arrived == shared.world {
            slot.mean = slot.sum / shared.world as f64;
            slot.sum = 0.0;
            slot.arrived = 0;
            slot.generation = round + 1;
            shared.cond.notify_all();
        } else {
            while slot.generation == round {
                shared.cond.wait(&mut slot);
            }
        }
        Ok(slot.mean)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
