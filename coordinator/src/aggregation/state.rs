use std::{collections::HashMap, pin::pin};

use comms::specs::DeltaEntry;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{AggregationErr, WeightDelta};
use crate::config::Mode;

/// How a wait on the aggregation state ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The awaited condition holds.
    Reached,
    /// Every worker finished its epochs before the condition held, nothing more will arrive.
    AllEpochsDone,
}

/// A point in time view of the state's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub pending_workers: usize,
    pub volume: usize,
    pub sync_update_counter: usize,
    pub sync_ready_counter: usize,
    pub epochs_done_counter: usize,
}

#[derive(Debug)]
struct Inner {
    pending_deltas: HashMap<usize, WeightDelta>,
    sync_update_counter: usize,
    sync_ready_counter: usize,
    epochs_done_counter: usize,
    ready: Vec<bool>,
    epochs_done: Vec<bool>,
}

impl Inner {
    fn volume(&self) -> usize {
        self.pending_deltas.values().map(WeightDelta::len).sum()
    }
}

/// The deltas and round counters shared between the inbound handlers and the orchestrator.
///
/// Every read-modify-write happens under a single lock, every mutation wakes the waiters.
#[derive(Debug)]
pub struct AggregationState {
    mode: Mode,
    workers: usize,
    dim: usize,
    inner: Mutex<Inner>,
    changed: Notify,
}

impl AggregationState {
    /// Creates a new `AggregationState`.
    ///
    /// # Arguments
    /// * `mode` - How rounds are synchronized.
    /// * `workers` - The fixed amount of workers in the run.
    /// * `dim` - The model dimension, incoming indices must be below it.
    pub fn new(mode: Mode, workers: usize, dim: usize) -> Self {
        let inner = Inner {
            pending_deltas: HashMap::with_capacity(workers),
            sync_update_counter: 0,
            sync_ready_counter: 0,
            epochs_done_counter: 0,
            ready: vec![false; workers],
            epochs_done: vec![false; workers],
        };

        Self {
            mode,
            workers,
            dim,
            inner: Mutex::new(inner),
            changed: Notify::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Handles a worker's weight delta.
    ///
    /// In synchronous mode each worker contributes exactly one delta per round, in
    /// asynchronous mode repeated submissions are summed until the next drain.
    ///
    /// # Arguments
    /// * `worker_id` - The submitting worker.
    /// * `entries` - The sparse delta as received from the wire.
    ///
    /// # Returns
    /// An error if the call was rejected, in which case nothing changed.
    pub fn submit_update(
        &self,
        worker_id: usize,
        entries: &[DeltaEntry],
    ) -> Result<(), AggregationErr> {
        self.check_worker(worker_id)?;
        self.check_entries(entries)?;

        {
            let mut inner = self.inner.lock();

            match self.mode {
                Mode::Synchronous => {
                    if inner.pending_deltas.contains_key(&worker_id) {
                        return Err(AggregationErr::DuplicateUpdate { worker_id });
                    }

                    inner
                        .pending_deltas
                        .insert(worker_id, WeightDelta::from_entries(entries));
                    inner.sync_update_counter += 1;
                }
                Mode::Asynchronous => {
                    inner
                        .pending_deltas
                        .entry(worker_id)
                        .or_default()
                        .add_entries(entries);
                }
            }
        }

        self.changed.notify_waiters();
        Ok(())
    }

    /// Handles a worker's readiness for the next synchronous round.
    pub fn submit_ready(&self, worker_id: usize) -> Result<(), AggregationErr> {
        self.check_worker(worker_id)?;

        if self.mode != Mode::Synchronous {
            return Err(AggregationErr::WrongMode {
                call: "submit_ready_to_go",
                mode: self.mode,
            });
        }

        {
            let mut inner = self.inner.lock();
            if inner.ready[worker_id] {
                return Err(AggregationErr::DuplicateReady { worker_id });
            }

            inner.ready[worker_id] = true;
            inner.sync_ready_counter += 1;
        }

        self.changed.notify_waiters();
        Ok(())
    }

    /// Handles a worker signaling it finished all of its local epochs.
    pub fn submit_epoch_done(&self, worker_id: usize) -> Result<(), AggregationErr> {
        self.check_worker(worker_id)?;

        {
            let mut inner = self.inner.lock();
            if inner.epochs_done[worker_id] {
                return Err(AggregationErr::DuplicateEpochDone { worker_id });
            }

            inner.epochs_done[worker_id] = true;
            inner.epochs_done_counter += 1;
        }

        self.changed.notify_waiters();
        Ok(())
    }

    /// Waits until every worker submitted its delta for the current synchronous round.
    pub async fn wait_for_updates(&self) -> WaitOutcome {
        let workers = self.workers;
        self.wait_until(|inner| inner.sync_update_counter == workers)
            .await
    }

    /// Waits until every worker is ready for the next synchronous round.
    pub async fn wait_for_ready(&self) -> WaitOutcome {
        let workers = self.workers;
        self.wait_until(|inner| inner.sync_ready_counter == workers)
            .await
    }

    /// Waits until the pending deltas hold at least `threshold` entries.
    ///
    /// Volume sums each worker's distinct indices, an index touched by two workers counts twice.
    pub async fn wait_for_volume(&self, threshold: usize) -> WaitOutcome {
        self.wait_until(|inner| inner.volume() >= threshold).await
    }

    /// Takes the sum of every pending delta, leaving the state ready for a new round.
    ///
    /// The returned delta is owned by the caller, so it can be applied to the model
    /// without holding the lock.
    pub fn drain(&self) -> WeightDelta {
        let pending = {
            let mut inner = self.inner.lock();
            inner.sync_update_counter = 0;
            std::mem::take(&mut inner.pending_deltas)
        };

        self.changed.notify_waiters();

        let mut aggregate = WeightDelta::new();
        for delta in pending.values() {
            aggregate.merge(delta);
        }

        aggregate
    }

    /// Clears the readiness of every worker once the synchronous round was released.
    pub fn reset_ready(&self) {
        {
            let mut inner = self.inner.lock();
            inner.sync_ready_counter = 0;
            inner.ready.fill(false);
        }

        self.changed.notify_waiters();
    }

    pub fn all_epochs_done(&self) -> bool {
        self.inner.lock().epochs_done_counter == self.workers
    }

    pub fn counters(&self) -> Counters {
        let inner = self.inner.lock();

        Counters {
            pending_workers: inner.pending_deltas.len(),
            volume: inner.volume(),
            sync_update_counter: inner.sync_update_counter,
            sync_ready_counter: inner.sync_ready_counter,
            epochs_done_counter: inner.epochs_done_counter,
        }
    }

    /// Parks the caller until `condition` holds or every worker is done.
    ///
    /// Interest in the next notification is registered before checking, so a
    /// mutation between the check and the await is never missed.
    async fn wait_until<F>(&self, condition: F) -> WaitOutcome
    where
        F: Fn(&Inner) -> bool,
    {
        loop {
            let mut notified = pin!(self.changed.notified());
            notified.as_mut().enable();

            {
                let inner = self.inner.lock();
                if condition(&inner) {
                    return WaitOutcome::Reached;
                }

                if inner.epochs_done_counter == self.workers {
                    return WaitOutcome::AllEpochsDone;
                }
            }

            notified.await;
        }
    }

    fn check_worker(&self, worker_id: usize) -> Result<(), AggregationErr> {
        if worker_id >= self.workers {
            return Err(AggregationErr::UnknownWorker {
                worker_id,
                workers: self.workers,
            });
        }

        Ok(())
    }

    fn check_entries(&self, entries: &[DeltaEntry]) -> Result<(), AggregationErr> {
        for &DeltaEntry { index, value } in entries {
            if index as usize >= self.dim {
                return Err(AggregationErr::IndexOutOfRange {
                    index,
                    dim: self.dim,
                });
            }

            if !value.is_finite() {
                return Err(AggregationErr::NonFiniteValue { index });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::time;

    use super::*;

    fn entries(pairs: &[(u32, f32)]) -> Vec<DeltaEntry> {
        pairs.iter().map(|&(i, v)| DeltaEntry::new(i, v)).collect()
    }

    #[test]
    fn rejected_calls_leave_state_untouched() {
        let state = AggregationState::new(Mode::Synchronous, 2, 4);

        assert_eq!(
            state.submit_update(2, &entries(&[(0, 1.0)])),
            Err(AggregationErr::UnknownWorker {
                worker_id: 2,
                workers: 2
            })
        );
        assert_eq!(
            state.submit_update(0, &entries(&[(0, 1.0), (4, 1.0)])),
            Err(AggregationErr::IndexOutOfRange { index: 4, dim: 4 })
        );
        assert_eq!(
            state.submit_update(0, &entries(&[(1, f32::NAN)])),
            Err(AggregationErr::NonFiniteValue { index: 1 })
        );

        assert_eq!(state.counters(), Counters::default());
    }

    #[test]
    fn sync_counter_is_bounded_by_worker_count() {
        let state = AggregationState::new(Mode::Synchronous, 2, 4);

        state.submit_update(0, &entries(&[(0, 1.0)])).unwrap();
        assert_eq!(
            state.submit_update(0, &entries(&[(0, 1.0)])),
            Err(AggregationErr::DuplicateUpdate { worker_id: 0 })
        );
        state.submit_update(1, &entries(&[(1, 1.0)])).unwrap();

        assert_eq!(state.counters().sync_update_counter, 2);

        let aggregate = state.drain();
        assert_eq!(aggregate, WeightDelta::from_iter([(0, 1.0), (1, 1.0)]));
        assert_eq!(state.counters(), Counters::default());

        // A fresh round accepts the same worker again.
        state.submit_update(0, &entries(&[(0, 1.0)])).unwrap();
        assert_eq!(state.counters().sync_update_counter, 1);
    }

    #[test]
    fn async_submissions_are_summed_per_worker() {
        let state = AggregationState::new(Mode::Asynchronous, 2, 8);

        state.submit_update(0, &entries(&[(3, 1.0)])).unwrap();
        state.submit_update(0, &entries(&[(3, 2.0), (5, 1.0)])).unwrap();

        let counters = state.counters();
        assert_eq!(counters.pending_workers, 1);
        assert_eq!(counters.volume, 2);
        assert_eq!(counters.sync_update_counter, 0);

        assert_eq!(state.drain(), WeightDelta::from_iter([(3, 3.0), (5, 1.0)]));
    }

    #[test]
    fn readiness_is_synchronous_only_and_deduplicated() {
        let sync = AggregationState::new(Mode::Synchronous, 2, 1);
        sync.submit_ready(1).unwrap();
        assert_eq!(
            sync.submit_ready(1),
            Err(AggregationErr::DuplicateReady { worker_id: 1 })
        );
        sync.reset_ready();
        sync.submit_ready(1).unwrap();

        let lazy = AggregationState::new(Mode::Asynchronous, 2, 1);
        assert!(matches!(
            lazy.submit_ready(0),
            Err(AggregationErr::WrongMode { .. })
        ));
    }

    #[test]
    fn aggregation_is_order_independent() {
        let deltas = [
            entries(&[(0, 1.0), (2, 0.5)]),
            entries(&[(0, -2.0), (1, 4.0)]),
            entries(&[(2, 0.25), (3, 1.0)]),
        ];

        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        let mut aggregates = orders.iter().map(|order| {
            let state = AggregationState::new(Mode::Synchronous, 3, 4);
            for &worker in order {
                state.submit_update(worker, &deltas[worker]).unwrap();
            }
            state.drain()
        });

        let first = aggregates.next().unwrap();
        assert!(aggregates.all(|aggregate| aggregate == first));
        assert_eq!(first.get(0), -1.0);
        assert_eq!(first.get(2), 0.75);
    }

    #[tokio::test]
    async fn barrier_waits_for_every_worker() {
        let state = Arc::new(AggregationState::new(Mode::Synchronous, 3, 4));

        let waiter = tokio::spawn({
            let state = Arc::clone(&state);
            async move { state.wait_for_updates().await }
        });

        for worker in 0..2 {
            state.submit_update(worker, &entries(&[(0, 1.0)])).unwrap();
            time::sleep(Duration::from_millis(10)).await;
            assert!(!waiter.is_finished());
        }

        state.submit_update(2, &entries(&[(0, 1.0)])).unwrap();
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Reached);

        assert_eq!(state.drain().get(0), 3.0);
        assert_eq!(state.counters().sync_update_counter, 0);
    }

    #[tokio::test]
    async fn volume_threshold_triggers_exactly_once_crossed() {
        let state = Arc::new(AggregationState::new(Mode::Asynchronous, 2, 16));

        let waiter = tokio::spawn({
            let state = Arc::clone(&state);
            async move { state.wait_for_volume(4).await }
        });

        state.submit_update(0, &entries(&[(0, 1.0), (1, 1.0), (2, 1.0)])).unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        // A single submission jumping past the threshold still triggers.
        state.submit_update(1, &entries(&[(3, 1.0), (4, 1.0)])).unwrap();
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Reached);
        assert_eq!(state.drain().len(), 5);
        assert_eq!(state.counters().volume, 0);
    }

    #[test]
    fn shared_indices_count_once_per_worker() {
        let state = AggregationState::new(Mode::Asynchronous, 2, 4);

        state.submit_update(0, &entries(&[(0, 1.0), (1, 1.0)])).unwrap();
        state.submit_update(0, &entries(&[(1, 1.0)])).unwrap();
        state.submit_update(1, &entries(&[(1, 1.0)])).unwrap();

        assert_eq!(state.counters().volume, 3);
        assert_eq!(state.drain().len(), 2);
    }

    #[tokio::test]
    async fn epoch_completion_releases_waiters() {
        let state = Arc::new(AggregationState::new(Mode::Synchronous, 2, 4));

        let waiter = tokio::spawn({
            let state = Arc::clone(&state);
            async move { state.wait_for_ready().await }
        });

        state.submit_epoch_done(0).unwrap();
        assert_eq!(
            state.submit_epoch_done(0),
            Err(AggregationErr::DuplicateEpochDone { worker_id: 0 })
        );
        state.submit_epoch_done(1).unwrap();

        assert_eq!(waiter.await.unwrap(), WaitOutcome::AllEpochsDone);
        assert!(state.all_epochs_done());
    }
}
