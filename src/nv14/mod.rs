// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! This module contains the migration logic for the actors v5 to v6
//! upgrade. The upgrade updates every actor's code CID, deletes the
//! test-proof-type miners together with their power claims, and
//! transfers the balances of deleted miners to their owners.
//!
//! The corresponding Go implementation can be found here:
//! <https://github.com/filecoin-project/specs-actors/tree/master/actors/migration/nv14>

mod miner;
mod power;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::sector::RegisteredPoStProof;

use crate::actors::{v5, v6};
use crate::common::migrators::{cached_migrator, nil_migrator};
use crate::common::{MigrationCache, MigrationConfig, StateMigration};
use crate::state_tree::StateTree;
use crate::{MigrationError, MigrationResult};

/// Number of builtin actor code CIDs in the prior protocol version. The
/// registration must account for every one of them.
const PRIOR_CODE_ID_COUNT: usize = 11;

impl<BS: Blockstore + 'static> StateMigration<BS> {
    pub fn add_nv14_migrations(&mut self) -> MigrationResult<()> {
        self.add_migrator(
            *v5::ACCOUNT_ACTOR_CODE_ID,
            nil_migrator(*v6::ACCOUNT_ACTOR_CODE_ID),
        );
        self.add_migrator(*v5::CRON_ACTOR_CODE_ID, nil_migrator(*v6::CRON_ACTOR_CODE_ID));
        self.add_migrator(*v5::INIT_ACTOR_CODE_ID, nil_migrator(*v6::INIT_ACTOR_CODE_ID));
        self.add_migrator(
            *v5::MULTISIG_ACTOR_CODE_ID,
            nil_migrator(*v6::MULTISIG_ACTOR_CODE_ID),
        );
        self.add_migrator(
            *v5::PAYCH_ACTOR_CODE_ID,
            nil_migrator(*v6::PAYCH_ACTOR_CODE_ID),
        );
        self.add_migrator(
            *v5::REWARD_ACTOR_CODE_ID,
            nil_migrator(*v6::REWARD_ACTOR_CODE_ID),
        );
        self.add_migrator(
            *v5::MARKET_ACTOR_CODE_ID,
            nil_migrator(*v6::MARKET_ACTOR_CODE_ID),
        );
        self.add_migrator(
            *v5::SYSTEM_ACTOR_CODE_ID,
            nil_migrator(*v6::SYSTEM_ACTOR_CODE_ID),
        );
        self.add_migrator(
            *v5::VERIFREG_ACTOR_CODE_ID,
            nil_migrator(*v6::VERIFREG_ACTOR_CODE_ID),
        );
        // The miner migrator can request deletion, which the cache
        // cannot represent; it must stay unwrapped.
        self.add_migrator(
            *v5::MINER_ACTOR_CODE_ID,
            miner::miner_migrator(*v6::MINER_ACTOR_CODE_ID),
        );
        self.add_migrator(
            *v5::POWER_ACTOR_CODE_ID,
            cached_migrator(power::power_migrator(*v6::POWER_ACTOR_CODE_ID)),
        );

        let count = self.migration_count();
        if count != PRIOR_CODE_ID_COUNT {
            return Err(MigrationError::IncompleteMigrationSpec(count));
        }
        Ok(())
    }
}

/// Migrates the state tree starting from the global state tree root,
/// upgrading all actor state, and returns the root of the migrated
/// tree. The store must support concurrent reads and writes even when
/// the configured worker count is 1.
pub fn run_migration<BS>(
    store: &BS,
    actors_root_in: &Cid,
    prior_epoch: ChainEpoch,
    config: &MigrationConfig,
    cache: MigrationCache,
) -> MigrationResult<Cid>
where
    BS: Blockstore + Clone + Send + Sync + 'static,
{
    let mut migration = StateMigration::new(cache);
    migration.add_nv14_migrations()?;

    let actors_in = StateTree::new_from_root(store.clone(), actors_root_in)
        .map_err(|e| MigrationError::StateTreeCreation(e.to_string()))?;
    let actors_out = StateTree::new(store.clone());

    migration.migrate_state_tree(store, prior_epoch, actors_in, actors_out, config)
}

/// The test proof types: the 2 KiB, 8 MiB and 512 MiB Winning- and
/// Window-PoSt variants. Miners carrying one of these can only exist on
/// test networks and are deleted by this upgrade.
pub(crate) fn is_test_post_proof_type(proof: RegisteredPoStProof) -> bool {
    use RegisteredPoStProof::*;
    matches!(
        proof,
        StackedDRGWinning2KiBV1
            | StackedDRGWinning8MiBV1
            | StackedDRGWinning512MiBV1
            | StackedDRGWindow2KiBV1
            | StackedDRGWindow8MiBV1
            | StackedDRGWindow512MiBV1
    )
}
