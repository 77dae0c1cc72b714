// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Migrators that are not specific to a single network upgrade.

use std::sync::Arc;

use anyhow::ensure;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;

use super::{
    actor_head_key, ActorMigration, ActorMigrationInput, ActorMigrationOutput, Migrator,
};

/// Creates a migrator which preserves the head CID and provides a fixed
/// result code CID. This is the default for code IDs whose state schema
/// did not change in the upgrade.
pub(crate) fn nil_migrator<BS: Blockstore>(cid: Cid) -> Migrator<BS> {
    Arc::new(NilMigrator(cid))
}

/// Migrator which preserves the head CID and provides a fixed result
/// code CID.
pub(crate) struct NilMigrator(Cid);

impl<BS: Blockstore> ActorMigration<BS> for NilMigrator {
    fn migrate_state(
        &self,
        _store: &BS,
        input: ActorMigrationInput,
    ) -> anyhow::Result<ActorMigrationOutput> {
        Ok(ActorMigrationOutput {
            new_code_cid: self.0,
            new_head: input.head,
            delete: None,
        })
    }

    fn migrated_code_cid(&self) -> Cid {
        self.0
    }
}

/// Wraps a migrator so repeated migrations of the same `(address, head)`
/// pair are served from the [`super::MigrationCache`].
///
/// The cache memoises the new head only, so a deletion or transfer
/// requested by the inner migrator would be lost on a cache hit.
/// Wrapping a migrator that can request deletion is a configuration
/// error and fails the run.
pub(crate) fn cached_migrator<BS: Blockstore + 'static>(migrator: Migrator<BS>) -> Migrator<BS> {
    Arc::new(CachedMigrator { migrator })
}

pub(crate) struct CachedMigrator<BS> {
    migrator: Migrator<BS>,
}

impl<BS: Blockstore> ActorMigration<BS> for CachedMigrator<BS> {
    fn migrate_state(
        &self,
        store: &BS,
        input: ActorMigrationInput,
    ) -> anyhow::Result<ActorMigrationOutput> {
        let key = actor_head_key(&input.address, &input.head);
        let cache = input.cache.clone();
        let new_head = cache.get_or_insert_with(key, || {
            let output = self.migrator.migrate_state(store, input)?;
            ensure!(
                output.delete.is_none(),
                "cannot cache a migration that deletes the actor"
            );
            Ok(output.new_head)
        })?;
        Ok(ActorMigrationOutput {
            new_code_cid: self.migrator.migrated_code_cid(),
            new_head,
            delete: None,
        })
    }

    fn migrated_code_cid(&self) -> Cid {
        self.migrator.migrated_code_cid()
    }
}
