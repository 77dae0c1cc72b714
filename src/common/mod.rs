// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Common code that's shared across all migration code.
//! Each network upgrade / state migration code lives in its own module.

use std::sync::Arc;

use ahash::HashMap;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::{address::Address, clock::ChainEpoch, econ::TokenAmount};
use parking_lot::RwLock;

mod migration_job;
pub(crate) mod migrators;
mod state_migration;

pub(crate) use migration_job::{MigrationJob, MigrationJobOutput};
pub use state_migration::{MigrationConfig, StateMigration};

pub type Migrator<BS> = Arc<dyn ActorMigration<BS> + Send + Sync>;

/// Cache key under which an actor's migrated head is memoised. The key
/// format is shared with the other implementations of this migration,
/// so a persisted cache can be reused across them.
pub fn actor_head_key(address: &Address, head: &Cid) -> String {
    format!("{address}-h-{head}")
}

/// Cache of existing CID to CID migrations for an actor. Shared by all
/// workers of a run, and reusable across runs against the same store.
#[derive(Clone, Default)]
pub struct MigrationCache {
    cache: Arc<RwLock<HashMap<String, Cid>>>,
}

impl MigrationCache {
    pub fn get(&self, key: &str) -> Option<Cid> {
        self.cache.read().get(key).cloned()
    }

    /// Returns the value for `key`, computing and storing it with `f`
    /// when absent. `f` may run more than once under contention and must
    /// be idempotent and pure with respect to its key.
    pub fn get_or_insert_with<F>(&self, key: String, f: F) -> anyhow::Result<Cid>
    where
        F: FnOnce() -> anyhow::Result<Cid>,
    {
        if let Some(v) = self.cache.read().get(&key) {
            return Ok(*v);
        }
        let v = f()?;
        self.cache.write().insert(key, v);
        Ok(v)
    }

    /// Inserts a value. Inserting a different value under an existing
    /// key is a caller error; the last write wins.
    pub fn insert(&self, key: String, value: Cid) {
        self.cache.write().insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

pub struct ActorMigrationInput {
    /// Actor's address
    pub address: Address,
    /// Actor's balance
    pub balance: TokenAmount,
    /// Actor's state head CID
    pub head: Cid,
    /// Epoch of last state transition prior to migration
    pub prior_epoch: ChainEpoch,
    /// Cache of existing CID to CID migrations for this actor
    pub cache: MigrationCache,
}

/// A balance transfer recorded when a deleted actor's funds must move to
/// another actor. Applied only after the whole pipeline has joined.
#[derive(Debug, Clone)]
pub struct BalanceTransfer {
    pub to: Address,
    pub value: TokenAmount,
}

/// Output of an actor migration job.
#[derive(Debug)]
pub struct ActorMigrationOutput {
    /// New code CID for the actor
    pub new_code_cid: Cid,
    /// New state head CID
    pub new_head: Cid,
    /// When set, the writer drops the actor from the output tree and
    /// records the transfer instead of inserting the migrated record.
    pub delete: Option<BalanceTransfer>,
}

/// Trait that defines the interface for an actor migration job.
pub trait ActorMigration<BS: Blockstore> {
    /// Loads an actor's state from the store and writes any migrated
    /// state back, returning the new head CID. Must be deterministic in
    /// its inputs and must never mutate the input tree.
    fn migrate_state(
        &self,
        store: &BS,
        input: ActorMigrationInput,
    ) -> anyhow::Result<ActorMigrationOutput>;

    /// The code CID this migration assigns to migrated actors.
    fn migrated_code_cid(&self) -> Cid;
}
