// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_ipld_blockstore::Blockstore;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;

use super::{ActorMigrationInput, BalanceTransfer, MigrationCache, Migrator};
use crate::state_tree::ActorState;

/// Defines the migration job for a single actor migration. Jobs are
/// immutable once queued.
pub(crate) struct MigrationJob<BS> {
    pub address: Address,
    pub actor_state: ActorState,
    pub cache: MigrationCache,
    pub actor_migration: Migrator<BS>,
}

/// Defines the migration result for a single actor migration.
#[derive(Debug)]
pub(crate) struct MigrationJobOutput {
    pub address: Address,
    pub actor_state: ActorState,
    /// When set, the actor is dropped from the output tree and the
    /// transfer applied once the pipeline joins.
    pub delete: Option<BalanceTransfer>,
}

impl<BS: Blockstore> MigrationJob<BS> {
    pub(crate) fn run(
        &self,
        store: &BS,
        prior_epoch: ChainEpoch,
    ) -> anyhow::Result<MigrationJobOutput> {
        let output = self
            .actor_migration
            .migrate_state(
                store,
                ActorMigrationInput {
                    address: self.address,
                    balance: self.actor_state.balance.clone(),
                    head: self.actor_state.state,
                    prior_epoch,
                    cache: self.cache.clone(),
                },
            )
            .map_err(|e| {
                anyhow::anyhow!(
                    "state migration failed for {} actor, addr {}: {}",
                    self.actor_state.code,
                    self.address,
                    e
                )
            })?;

        Ok(MigrationJobOutput {
            address: self.address,
            actor_state: ActorState::new(
                output.new_code_cid,
                output.new_head,
                self.actor_state.balance.clone(), // unchanged
                self.actor_state.sequence,        // unchanged
            ),
            delete: output.delete,
        })
    }
}
