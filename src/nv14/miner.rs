// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Miner actor migration. Miner heads are preserved; a miner whose
//! window PoSt proof type is a test type is checked against its
//! zero-value preconditions and flagged for deletion, transferring its
//! balance to its owner.

use std::sync::Arc;

use anyhow::bail;
use cid::Cid;
use fvm_ipld_amt::Amt;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::HAMT_BIT_WIDTH;

use super::is_test_post_proof_type;
use crate::actors::miner::{SectorOnChainInfo, SectorPreCommitOnChainInfo, State};
use crate::actors::Map;
use crate::common::{
    ActorMigration, ActorMigrationInput, ActorMigrationOutput, BalanceTransfer, Migrator,
};
use crate::db::CborStoreExt;

pub(super) struct MinerMigrator(Cid);

pub(super) fn miner_migrator<BS: Blockstore>(cid: Cid) -> Migrator<BS> {
    Arc::new(MinerMigrator(cid))
}

impl<BS: Blockstore> ActorMigration<BS> for MinerMigrator {
    fn migrate_state(
        &self,
        store: &BS,
        input: ActorMigrationInput,
    ) -> anyhow::Result<ActorMigrationOutput> {
        let in_state: State = store.get_cbor_required(&input.head)?;
        let info = in_state.get_info(store)?;

        if !is_test_post_proof_type(info.window_post_proof_type) {
            return Ok(ActorMigrationOutput {
                new_code_cid: self.0,
                new_head: input.head,
                delete: None,
            });
        }

        // A miner that only ever proved test sectors must not have
        // accumulated economic state.
        if !in_state.pre_commit_deposits.is_zero() {
            bail!(
                "test type miner has nonzero PreCommitDeposits at address {}",
                input.address
            );
        }
        if !in_state.locked_funds.is_zero() {
            bail!(
                "test type miner has nonzero LockedFunds at address {}",
                input.address
            );
        }
        if !in_state.fee_debt.is_zero() {
            bail!(
                "test type miner has nonzero FeeDebt at address {}",
                input.address
            );
        }
        if !in_state.initial_pledge.is_zero() {
            bail!(
                "test type miner has nonzero InitialPledge at address {}",
                input.address
            );
        }

        let sectors = Amt::<SectorOnChainInfo, _>::load(&in_state.sectors, store)?;
        if sectors.count() != 0 {
            bail!(
                "test type miner has nonzero length of Sectors at address {}",
                input.address
            );
        }

        let pre_committed: Map<_, SectorPreCommitOnChainInfo> =
            Map::load_with_bit_width(&in_state.pre_committed_sectors, store, HAMT_BIT_WIDTH)?;
        let mut pre_committed_count = 0u64;
        pre_committed.for_each(|_, _| {
            pre_committed_count += 1;
            Ok(())
        })?;
        if pre_committed_count != 0 {
            bail!(
                "test type miner has nonzero length of PreCommittedSectors at address {}",
                input.address
            );
        }

        Ok(ActorMigrationOutput {
            new_code_cid: self.0,
            new_head: input.head,
            delete: Some(BalanceTransfer {
                to: info.owner,
                value: input.balance,
            }),
        })
    }

    fn migrated_code_cid(&self) -> Cid {
        self.0
    }
}
