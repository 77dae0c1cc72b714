// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Power actor migration. The claim of every deleted test-proof-type
//! miner is removed from the claims map and the miner count is
//! decremented accordingly.

use std::sync::Arc;

use anyhow::bail;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::address::Address;
use fvm_shared::smooth::FilterEstimate;
use num_traits::Signed;

use super::is_test_post_proof_type;
use crate::actors::power::{delete_claim, Claim, State};
use crate::common::{ActorMigration, ActorMigrationInput, ActorMigrationOutput, Migrator};
use crate::db::CborStoreExt;

pub(super) struct PowerMigrator(Cid);

pub(super) fn power_migrator<BS: Blockstore>(cid: Cid) -> Migrator<BS> {
    Arc::new(PowerMigrator(cid))
}

impl<BS: Blockstore> ActorMigration<BS> for PowerMigrator {
    fn migrate_state(
        &self,
        store: &BS,
        input: ActorMigrationInput,
    ) -> anyhow::Result<ActorMigrationOutput> {
        let in_state: State = store.get_cbor_required(&input.head)?;

        let mut out_state = State {
            total_raw_byte_power: in_state.total_raw_byte_power,
            total_bytes_committed: in_state.total_bytes_committed,
            total_quality_adj_power: in_state.total_quality_adj_power,
            total_qa_bytes_committed: in_state.total_qa_bytes_committed,
            total_pledge_collateral: in_state.total_pledge_collateral,
            this_epoch_raw_byte_power: in_state.this_epoch_raw_byte_power,
            this_epoch_quality_adj_power: in_state.this_epoch_quality_adj_power,
            this_epoch_pledge_collateral: in_state.this_epoch_pledge_collateral,
            this_epoch_qa_power_smoothed: FilterEstimate::new(
                in_state.this_epoch_qa_power_smoothed.position,
                in_state.this_epoch_qa_power_smoothed.velocity,
            ),
            miner_count: in_state.miner_count,
            miner_above_min_power_count: in_state.miner_above_min_power_count,
            cron_event_queue: in_state.cron_event_queue,
            first_cron_epoch: in_state.first_cron_epoch,
            claims: in_state.claims,
            proof_validation_batch: in_state.proof_validation_batch,
        };

        let mut claims = out_state.load_claims(store)?;

        let mut to_delete: Vec<Address> = Vec::new();
        claims.for_each(|key, claim: &Claim| {
            if is_test_post_proof_type(claim.window_post_proof_type) {
                let address = Address::from_bytes(key)?;
                // Test miners are deleted without any power accounting,
                // so they must not hold power.
                if claim.raw_byte_power.is_positive() || claim.quality_adj_power.is_positive() {
                    bail!("test type miner {address} has nonzero power in its claim");
                }
                to_delete.push(address);
            }
            Ok(())
        })?;

        for address in &to_delete {
            delete_claim(&mut claims, address)?;
            out_state.miner_count -= 1;
        }
        // `miner_above_min_power_count` stays as-is: test miners cannot
        // reach the consensus minimum.

        out_state.claims = claims
            .flush()
            .map_err(|e| anyhow::anyhow!("failed to flush claims: {e}"))?;
        let new_head = store.put_cbor_default(&out_state)?;

        Ok(ActorMigrationOutput {
            new_code_cid: self.0,
            new_head,
            delete: None,
        })
    }

    fn migrated_code_cid(&self) -> Cid {
        self.0
    }
}
