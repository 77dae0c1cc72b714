// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The migration driver: a bounded pipeline that feeds actor records
//! from the input tree through per-code migrators into a fresh output
//! tree, then settles the balances of deleted actors.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ahash::{HashMap, HashSet};
use cid::Cid;
use flume::RecvTimeoutError;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use num_traits::Zero;
use parking_lot::Mutex;

use super::{BalanceTransfer, MigrationCache, MigrationJob, MigrationJobOutput, Migrator};
use crate::actors::BURNT_FUNDS_ACTOR_ADDR;
use crate::state_tree::StateTree;
use crate::{MigrationError, MigrationResult};

/// Parameterizes a state tree migration.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Number of migration worker threads. More workers raise CPU
    /// utilization of the migration computations, including state
    /// encoding. Must be at least 1.
    pub max_workers: usize,
    /// Capacity of the queue of jobs waiting for workers. A queue length
    /// of hundreds to thousands improves throughput at the cost of
    /// memory.
    pub job_queue_size: usize,
    /// Capacity of the queue of migrated results waiting for the writer.
    /// A queue length of tens to hundreds improves throughput at the
    /// cost of memory.
    pub result_queue_size: usize,
    /// Time between progress logs. Zero disables progress logging.
    pub progress_log_period: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1),
            job_queue_size: 1000,
            result_queue_size: 100,
            progress_log_period: Duration::ZERO,
        }
    }
}

/// A state tree migration, parameterized by the mapping from prior code
/// CID to the migrator handling actors of that code.
pub struct StateMigration<BS> {
    migrations: HashMap<Cid, Migrator<BS>>,
    /// Prior code CIDs of actors to skip during iteration, for explicit
    /// migration afterwards.
    deferred_code_ids: HashSet<Cid>,
    cache: MigrationCache,
}

impl<BS: Blockstore> StateMigration<BS> {
    pub fn new(cache: MigrationCache) -> Self {
        Self {
            migrations: HashMap::default(),
            deferred_code_ids: HashSet::default(),
            cache,
        }
    }

    /// Inserts a new migrator into the migration specification.
    pub fn add_migrator(&mut self, prior: Cid, migrator: Migrator<BS>) {
        self.migrations.insert(prior, migrator);
    }

    /// Number of code CIDs the specification accounts for.
    pub(crate) fn migration_count(&self) -> usize {
        self.migrations.len() + self.deferred_code_ids.len()
    }
}

impl<BS: Blockstore + Clone + Send + Sync> StateMigration<BS> {
    /// Runs the migration and returns the root of the flushed output
    /// tree. The first error of any pipeline stage cancels the run and
    /// is returned; the output tree is then discarded unflushed. The
    /// store must support concurrent reads and writes even when
    /// `max_workers` is 1.
    pub fn migrate_state_tree(
        &self,
        store: &BS,
        prior_epoch: ChainEpoch,
        actors_in: StateTree<BS>,
        actors_out: StateTree<BS>,
        config: &MigrationConfig,
    ) -> MigrationResult<Cid> {
        if config.max_workers == 0 {
            return Err(MigrationError::InvalidConfig(config.max_workers));
        }
        let start_time = Instant::now();

        // Producer, workers and monitor each get a dedicated pool
        // thread; the writer runs on the scope's own thread.
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_workers + 3)
            .thread_name(|id| format!("state-migration-{id}"))
            .build()?;

        let (job_tx, job_rx) = flume::bounded::<MigrationJob<BS>>(config.job_queue_size);
        let (result_tx, result_rx) = flume::bounded::<MigrationJobOutput>(config.result_queue_size);
        // Every worker holds a sender; the monitor stops when the last
        // one disconnects.
        let (workers_finished_tx, workers_finished_rx) = flume::bounded::<()>(0);

        let jobs_created = AtomicU64::new(0);
        let jobs_done = AtomicU64::new(0);
        let cancelled = AtomicBool::new(false);
        let first_error: Mutex<Option<MigrationError>> = Mutex::new(None);
        let transfers: Mutex<Vec<BalanceTransfer>> = Mutex::new(Vec::new());

        // Keeps the first cause; later failures are cancellation fallout.
        let record_error = |err: MigrationError| {
            let mut slot = first_error.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
            cancelled.store(true, Ordering::SeqCst);
        };

        let mut actors_out = pool.scope(|s| {
            let record_error = &record_error;
            let cancelled = &cancelled;
            let jobs_created = &jobs_created;
            let jobs_done = &jobs_done;
            let transfers = &transfers;
            let migrations = &self.migrations;
            let deferred_code_ids = &self.deferred_code_ids;
            let cache = &self.cache;
            let mut actors_out = actors_out;

            // Producer: one job per non-deferred actor of the input tree.
            {
                let job_tx = job_tx.clone();
                s.spawn(move |_| {
                    tracing::info!("Creating migration jobs");
                    let mut create_error: Option<MigrationError> = None;
                    let result = actors_in.for_each(|address, state| {
                        if cancelled.load(Ordering::SeqCst) {
                            anyhow::bail!("migration cancelled");
                        }
                        if deferred_code_ids.contains(&state.code) {
                            return Ok(());
                        }
                        let Some(migrator) = migrations.get(&state.code) else {
                            create_error = Some(MigrationError::MigratorNotFound(state.code));
                            anyhow::bail!(
                                "actor with code {} has no registered migration function",
                                state.code
                            );
                        };
                        let job = MigrationJob {
                            address,
                            // Must take a copy, the iteration's reference
                            // is not stable.
                            actor_state: state.clone(),
                            cache: cache.clone(),
                            actor_migration: migrator.clone(),
                        };
                        if job_tx.send(job).is_err() {
                            // All workers are gone; the run is over.
                            anyhow::bail!("migration cancelled");
                        }
                        jobs_created.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    });
                    match result {
                        Ok(()) => tracing::info!(
                            "Done creating {} migration jobs after {:?}",
                            jobs_created.load(Ordering::Relaxed),
                            start_time.elapsed()
                        ),
                        Err(e) => {
                            if let Some(err) = create_error.take() {
                                record_error(err);
                            } else if !cancelled.load(Ordering::SeqCst) {
                                record_error(MigrationError::MigrationJobCreate(e.to_string()));
                            }
                        }
                    }
                });
            }

            // Workers: run jobs, deliver results.
            for _ in 0..config.max_workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let workers_finished_tx = workers_finished_tx.clone();
                let store = store.clone();
                s.spawn(move |_| {
                    // Held until this worker exits.
                    let _finished = workers_finished_tx;
                    while let Ok(job) = job_rx.recv() {
                        if cancelled.load(Ordering::SeqCst) {
                            return;
                        }
                        let output = match job.run(&store, prior_epoch) {
                            Ok(output) => output,
                            Err(e) => {
                                record_error(MigrationError::MigrationJobRun(e.to_string()));
                                return;
                            }
                        };
                        if result_tx.send(output).is_err() {
                            return;
                        }
                        jobs_done.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }

            // Monitor: non-critical progress logging while workers run.
            if config.progress_log_period.is_zero() {
                drop(workers_finished_rx);
            } else {
                let period = config.progress_log_period;
                s.spawn(move |_| {
                    while let Err(RecvTimeoutError::Timeout) =
                        workers_finished_rx.recv_timeout(period)
                    {
                        let created = jobs_created.load(Ordering::Relaxed);
                        let done = jobs_done.load(Ordering::Relaxed);
                        let elapsed = start_time.elapsed();
                        let rate = done as f64 / elapsed.as_secs_f64();
                        tracing::info!(
                            "{created} jobs created, {done} done, {} pending after {elapsed:?} ({rate:.0}/s)",
                            created.saturating_sub(done)
                        );
                    }
                    tracing::debug!("Progress monitor done");
                });
            }

            // Moved into the scope so an early writer exit drops it and
            // unblocks any worker still sending.
            let result_rx = result_rx;
            drop(job_tx);
            drop(job_rx);
            drop(result_tx);
            drop(workers_finished_tx);
            tracing::info!("Started {} workers", config.max_workers);

            // Writer: the single consumer of migrated results.
            let mut result_count = 0u64;
            let mut deleted_count = 0u64;
            while let Ok(output) = result_rx.recv() {
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }
                match output.delete {
                    Some(transfer) => {
                        // Uncontended in practice, the writer is the only
                        // mutator until the pipeline joins.
                        transfers.lock().push(transfer);
                        deleted_count += 1;
                    }
                    None => match actors_out.set_actor(&output.address, output.actor_state) {
                        Ok(()) => result_count += 1,
                        Err(e) => {
                            record_error(MigrationError::SetActorState(e.to_string()));
                            break;
                        }
                    },
                }
            }
            tracing::info!(
                "Result writer wrote {result_count} results and recorded {deleted_count} deleted actors after {:?}",
                start_time.elapsed()
            );
            actors_out
        });

        if let Some(err) = first_error.into_inner() {
            return Err(err);
        }

        // Balance increments for the owners of deleted actors, strictly
        // after the writer has finished.
        for BalanceTransfer { to, value } in transfers.into_inner() {
            if value < TokenAmount::zero() {
                return Err(MigrationError::BalanceTransfer(format!(
                    "deleted actor's balance is negative and cannot be sent to {to}"
                )));
            }
            let (recipient, mut actor) = match actors_out
                .get_actor(&to)
                .map_err(|e| MigrationError::BlockStoreRead(e.to_string()))?
            {
                Some(actor) => (to, actor),
                None => {
                    // The owner may itself be gone; fall back to the
                    // burnt-funds actor.
                    let fallback = BURNT_FUNDS_ACTOR_ADDR;
                    let actor = actors_out
                        .get_actor(&fallback)
                        .map_err(|e| MigrationError::BlockStoreRead(e.to_string()))?
                        .ok_or_else(|| {
                            MigrationError::BalanceTransfer(format!(
                                "no actor {to} to receive the balance of a deleted actor, and no burnt-funds actor {fallback} to fall back to"
                            ))
                        })?;
                    (fallback, actor)
                }
            };
            actor.balance += value;
            actors_out
                .set_actor(&recipient, actor)
                .map_err(|e| MigrationError::SetActorState(e.to_string()))?;
        }

        let elapsed = start_time.elapsed();
        let done = jobs_done.load(Ordering::Relaxed);
        tracing::info!(
            "All {done} jobs done after {elapsed:?} ({:.0}/s), flushing the output tree",
            done as f64 / elapsed.as_secs_f64()
        );
        actors_out
            .flush()
            .map_err(|e| MigrationError::FlushFailed(e.to_string()))
    }
}
