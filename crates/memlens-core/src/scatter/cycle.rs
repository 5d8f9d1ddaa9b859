//! Cycles and rounds
//!
//! A cycle is created, filled, executed and discarded on one thread within
//! one refresh tick. Rounds are executed in batches: a batch starts at the
//! first unexecuted round and takes every following non-sequential round,
//! stopping before the next sequential one. Each batch is one physical
//! transaction. Callbacks run after their batch's transaction and may feed
//! rounds that have not executed yet.

use std::collections::HashSet;
use std::ops::Range;

use tracing::{debug, trace, warn};

use super::{RemoteValue, ResultSet, RoundKey, ScatterEngine};
use crate::address::AddressGate;
use crate::transport::ScatterRequest;

type Callback<'a> = Box<dyn FnOnce(&ResultSet, &mut Planner<'_, 'a>) + 'a>;

/// Refers to a round of the cycle that created it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoundHandle(usize);

impl RoundHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct Entry {
    key: RoundKey,
    address: u64,
    length: usize,
    /// Passed the address gate; rejected entries never reach the transport
    admitted: bool,
}

struct Round<'a> {
    sequential: bool,
    sealed: bool,
    entries: Vec<Entry>,
    keys: HashSet<RoundKey>,
    callbacks: Vec<Callback<'a>>,
}

impl Round<'_> {
    fn new(sequential: bool) -> Self {
        Self {
            sequential,
            sealed: false,
            entries: Vec::new(),
            keys: HashSet::new(),
            callbacks: Vec::new(),
        }
    }

    fn is_pending(&self) -> bool {
        !self.sealed && (!self.entries.is_empty() || !self.callbacks.is_empty())
    }
}

/// Mutable access to one round, from the cycle or from a callback
pub struct RoundMut<'r, 'a> {
    round: &'r mut Round<'a>,
    handle: RoundHandle,
    gate: AddressGate,
}

impl<'a> RoundMut<'_, 'a> {
    pub fn handle(&self) -> RoundHandle {
        self.handle
    }

    /// Register a typed read of `T::SIZE` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `key` is already used in this round or the round has executed.
    pub fn add_entry<T: RemoteValue>(&mut self, key: RoundKey, address: u64) -> &mut Self {
        let admitted = self.gate.is_valid_aligned(address, T::SIZE);
        self.push(key, address, T::SIZE, admitted)
    }

    /// Register a raw read of `length` bytes
    ///
    /// # Panics
    ///
    /// Same conditions as [`add_entry`](Self::add_entry).
    pub fn add_bytes(&mut self, key: RoundKey, address: u64, length: usize) -> &mut Self {
        let admitted = self.gate.is_valid_span(address, length);
        self.push(key, address, length, admitted)
    }

    fn push(&mut self, key: RoundKey, address: u64, length: usize, admitted: bool) -> &mut Self {
        assert!(
            !self.round.sealed,
            "entry {} added to round {} after it executed",
            key, self.handle.0
        );
        assert!(
            self.round.keys.insert(key),
            "duplicate key {} in round {}",
            key,
            self.handle.0
        );
        if !admitted {
            trace!(
                "Round {}: entry {} at {:#x} rejected by address gate",
                self.handle.0, key, address
            );
        }
        self.round.entries.push(Entry {
            key,
            address,
            length,
            admitted,
        });
        self
    }

    /// Invoke `callback` once with this round's results, after its transaction.
    ///
    /// Callbacks of a round run in registration order.
    pub fn on_complete<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce(&ResultSet, &mut Planner<'_, 'a>) + 'a,
    {
        assert!(
            !self.round.sealed,
            "callback registered on round {} after it executed",
            self.handle.0
        );
        self.round.callbacks.push(Box::new(callback));
        self
    }

    pub fn len(&self) -> usize {
        self.round.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.round.entries.is_empty()
    }
}

/// What a completion callback may do to the rest of its cycle
pub struct Planner<'p, 'a> {
    rounds: &'p mut Vec<Round<'a>>,
    gate: AddressGate,
}

impl<'a> Planner<'_, 'a> {
    /// Access a round that has not executed yet.
    ///
    /// # Panics
    ///
    /// Panics if the handle is unknown. Adding to an executed round panics
    /// on the first entry.
    pub fn round(&mut self, handle: RoundHandle) -> RoundMut<'_, 'a> {
        round_mut(self.rounds, handle, self.gate)
    }

    /// Append a new round after every existing one
    pub fn add_round(&mut self, sequential: bool) -> RoundHandle {
        self.rounds.push(Round::new(sequential));
        RoundHandle(self.rounds.len() - 1)
    }
}

fn round_mut<'r, 'a>(
    rounds: &'r mut [Round<'a>],
    handle: RoundHandle,
    gate: AddressGate,
) -> RoundMut<'r, 'a> {
    let count = rounds.len();
    let round = rounds
        .get_mut(handle.0)
        .unwrap_or_else(|| panic!("round {} does not exist (cycle has {})", handle.0, count));
    RoundMut {
        round,
        handle,
        gate,
    }
}

/// Outcome of [`Cycle::execute`]
#[derive(Debug, Default)]
pub struct CycleReport {
    results: Vec<ResultSet>,
    transactions: usize,
    failed_transactions: usize,
}

impl CycleReport {
    /// Results of the round, `None` if the handle came from another cycle
    pub fn results(&self, handle: RoundHandle) -> Option<&ResultSet> {
        self.results.get(handle.0)
    }

    /// Physical transactions issued
    pub fn transactions(&self) -> usize {
        self.transactions
    }

    /// Transactions that failed as a whole
    pub fn failed_transactions(&self) -> usize {
        self.failed_transactions
    }

    pub fn is_degraded(&self) -> bool {
        self.failed_transactions > 0
    }
}

/// One refresh tick's worth of batched reads.
///
/// Dropping a cycle without executing it discards every round; their
/// callbacks never run.
pub struct Cycle<'a> {
    engine: &'a ScatterEngine,
    rounds: Vec<Round<'a>>,
    results: Vec<ResultSet>,
}

impl<'a> Cycle<'a> {
    pub(crate) fn new(engine: &'a ScatterEngine) -> Self {
        Self {
            engine,
            rounds: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Create a round. `sequential` rounds wait for every earlier round's
    /// callbacks; others are coalesced with their neighbours.
    pub fn add_round(&mut self, sequential: bool) -> RoundHandle {
        self.rounds.push(Round::new(sequential));
        RoundHandle(self.rounds.len() - 1)
    }

    pub fn round(&mut self, handle: RoundHandle) -> RoundMut<'_, 'a> {
        round_mut(&mut self.rounds, handle, *self.engine.gate())
    }

    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    /// Run every round, firing callbacks batch by batch, until nothing is pending.
    pub fn execute(mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let mut next = 0;

        while next < self.rounds.len() {
            let mut end = next + 1;
            while end < self.rounds.len() && !self.rounds[end].sequential {
                end += 1;
            }
            self.run_batch(next..end, &mut report);
            next = end;
        }

        report.results = std::mem::take(&mut self.results);
        report
    }

    fn run_batch(&mut self, batch: Range<usize>, report: &mut CycleReport) {
        for round in &mut self.rounds[batch.clone()] {
            round.sealed = true;
        }
        if self.results.len() < batch.end {
            self.results.resize_with(batch.end, ResultSet::default);
        }

        let mut slots: Vec<(usize, RoundKey, usize)> = Vec::new();
        let mut requests: Vec<ScatterRequest> = Vec::new();
        for index in batch.clone() {
            for entry in self.rounds[index].entries.iter().filter(|e| e.admitted) {
                requests.push(ScatterRequest {
                    key: slots.len() as u32,
                    address: entry.address,
                    length: entry.length,
                });
                slots.push((index, entry.key, entry.length));
            }
        }

        if !requests.is_empty() {
            self.transact(&requests, slots, report);
        }

        let gate = *self.engine.gate();
        for index in batch {
            let callbacks = std::mem::take(&mut self.rounds[index].callbacks);
            let results = &self.results[index];
            let mut planner = Planner {
                rounds: &mut self.rounds,
                gate,
            };
            for callback in callbacks {
                callback(results, &mut planner);
            }
        }
    }

    fn transact(
        &mut self,
        requests: &[ScatterRequest],
        slots: Vec<(usize, RoundKey, usize)>,
        report: &mut CycleReport,
    ) {
        report.transactions += 1;

        let mut outcome = match self.engine.transport().read_scatter(requests) {
            Ok(outcome) => outcome,
            Err(e) => {
                report.failed_transactions += 1;
                if report.failed_transactions == 1 {
                    warn!("Scatter transaction of {} reads failed: {}", requests.len(), e);
                } else {
                    debug!("Scatter transaction of {} reads failed: {}", requests.len(), e);
                }
                return;
            }
        };

        for (flat, (round, key, length)) in slots.into_iter().enumerate() {
            match outcome.remove(&(flat as u32)) {
                Some(Ok(bytes)) if bytes.len() >= length => {
                    self.results[round].insert(key, bytes);
                }
                Some(Ok(bytes)) => {
                    trace!(
                        "Round {}: entry {} short read ({} of {} bytes)",
                        round,
                        key,
                        bytes.len(),
                        length
                    );
                }
                Some(Err(e)) => trace!("Round {}: entry {} failed: {}", round, key, e),
                None => trace!("Round {}: entry {} missing from transaction", round, key),
            }
        }
    }
}

impl Drop for Cycle<'_> {
    fn drop(&mut self) {
        let pending = self.rounds.iter().filter(|r| r.is_pending()).count();
        if pending > 0 {
            debug!("Discarding {} unexecuted rounds", pending);
        }
        self.rounds.clear();
    }
}
