// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Storage power actor state schema. The upgrade changes no power state
//! fields, so a single version of the schema serves both sides of the
//! migration.

use anyhow::anyhow;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::address::Address;
use fvm_shared::bigint::bigint_ser;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::{RegisteredPoStProof, StoragePower};
use fvm_shared::smooth::FilterEstimate;

use super::Map;

/// Storage power actor state
#[derive(Default, Debug, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct State {
    #[serde(with = "bigint_ser")]
    pub total_raw_byte_power: StoragePower,
    #[serde(with = "bigint_ser")]
    pub total_bytes_committed: StoragePower,
    #[serde(with = "bigint_ser")]
    pub total_quality_adj_power: StoragePower,
    #[serde(with = "bigint_ser")]
    pub total_qa_bytes_committed: StoragePower,
    pub total_pledge_collateral: TokenAmount,

    #[serde(with = "bigint_ser")]
    pub this_epoch_raw_byte_power: StoragePower,
    #[serde(with = "bigint_ser")]
    pub this_epoch_quality_adj_power: StoragePower,
    pub this_epoch_pledge_collateral: TokenAmount,
    pub this_epoch_qa_power_smoothed: FilterEstimate,

    pub miner_count: i64,
    /// Number of miners having proven the minimum consensus power.
    pub miner_above_min_power_count: i64,

    /// A queue of events to be triggered by cron, indexed by epoch.
    pub cron_event_queue: Cid, // Multimap, (HAMT[ChainEpoch]AMT[CronEvent])

    /// First epoch in which a cron task may be stored. Cron will iterate
    /// every epoch between this and the current epoch inclusively to
    /// find tasks to execute.
    pub first_cron_epoch: ChainEpoch,

    /// Claimed power for each miner.
    pub claims: Cid, // Map, HAMT[address]Claim

    pub proof_validation_batch: Option<Cid>,
}

impl State {
    /// Loads the claims map from the store.
    pub fn load_claims<BS: Blockstore>(&self, store: BS) -> anyhow::Result<Map<BS, Claim>> {
        Map::load_with_bit_width(&self.claims, store, fvm_shared::HAMT_BIT_WIDTH)
            .map_err(|e| anyhow!("failed to load claims: {e}"))
    }
}

/// Claimed power for one miner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct Claim {
    /// Miner's proof type used to determine minimum miner size.
    pub window_post_proof_type: RegisteredPoStProof,
    /// Sum of raw byte power for a miner's sectors.
    #[serde(with = "bigint_ser")]
    pub raw_byte_power: StoragePower,
    /// Sum of quality adjusted power for a miner's sectors.
    #[serde(with = "bigint_ser")]
    pub quality_adj_power: StoragePower,
}

/// Gets the claim for the given address, if any.
pub fn get_claim<'m, BS: Blockstore>(
    claims: &'m Map<BS, Claim>,
    a: &Address,
) -> anyhow::Result<Option<&'m Claim>> {
    claims
        .get(&a.to_bytes())
        .map_err(|e| anyhow!("failed to get claim for address {a}: {e}"))
}

/// Inserts or replaces the claim for the given address.
pub fn set_claim<BS: Blockstore>(
    claims: &mut Map<BS, Claim>,
    a: &Address,
    claim: Claim,
) -> anyhow::Result<()> {
    claims
        .set(a.to_bytes().into(), claim)
        .map_err(|e| anyhow!("failed to set claim for address {a}: {e}"))?;
    Ok(())
}

/// Removes the claim for the given address. The claim must exist.
pub fn delete_claim<BS: Blockstore>(claims: &mut Map<BS, Claim>, a: &Address) -> anyhow::Result<()> {
    claims
        .delete(&a.to_bytes())
        .map_err(|e| anyhow!("failed to delete claim for address {a}: {e}"))?
        .ok_or_else(|| anyhow!("no claim to delete for address {a}"))?;
    Ok(())
}
