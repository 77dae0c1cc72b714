// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Miner actor state schema of the prior protocol version. The upgrade
//! keeps miner heads unchanged, so a single version of the schema
//! serves both sides of the migration.

use cid::Cid;
use fvm_ipld_bitfield::BitField;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::{strict_bytes, BytesDe};
use fvm_shared::address::Address;
use fvm_shared::bigint::{bigint_ser, BigInt};
use fvm_shared::clock::ChainEpoch;
use fvm_shared::deal::DealID;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::{RegisteredPoStProof, RegisteredSealProof, SectorNumber, SectorSize};

use crate::db::CborStoreExt;

/// Balance of a miner actor should equal or exceed the sum of
/// pre-commit deposits, locked funds and initial pledge.
#[derive(Debug, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct State {
    /// Contains static info about this miner.
    pub info: Cid,

    /// Total funds locked as pre-commit deposits.
    pub pre_commit_deposits: TokenAmount,
    /// Total rewards and added funds locked in the vesting table.
    pub locked_funds: TokenAmount,
    /// Vesting funds schedule for the miner.
    pub vesting_funds: Cid,
    /// Absolute value of debt this miner owes from unpaid fees.
    pub fee_debt: TokenAmount,
    /// Sum of initial pledge requirements of all active sectors.
    pub initial_pledge: TokenAmount,

    /// Sectors that have been pre-committed but not yet proven.
    /// `Map<SectorNumber, SectorPreCommitOnChainInfo>`
    pub pre_committed_sectors: Cid,
    /// Maps epochs to the sector numbers of pre-commitments that expire then.
    pub pre_committed_sectors_cleanup: Cid,
    /// Allocated sector IDs. Sector IDs can never be reused once allocated.
    pub allocated_sectors: Cid,
    /// Information for all proven and not-yet-garbage-collected sectors.
    /// `Amt<SectorOnChainInfo>`
    pub sectors: Cid,

    /// The first epoch in this miner's current proving period.
    pub proving_period_start: ChainEpoch,
    /// Index of the deadline within the proving period that has not yet
    /// been finalized.
    pub current_deadline: u64,
    /// The sector numbers due for PoSt at each deadline in the current
    /// proving period, frozen at period start.
    pub deadlines: Cid,
    /// Deadlines with outstanding fees for early sector termination.
    pub early_terminations: BitField,
    /// True when there is an active deadline cron registered with the
    /// power actor.
    pub deadline_cron_active: bool,
}

impl State {
    /// Loads the static miner info record from the store.
    pub fn get_info<BS: Blockstore>(&self, store: &BS) -> anyhow::Result<MinerInfo> {
        store.get_cbor_required(&self.info)
    }
}

/// Static information about the miner.
#[derive(Debug, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct MinerInfo {
    /// Account that owns this miner. Income and returned collateral are
    /// paid to this address.
    pub owner: Address,
    /// Worker account for this miner. Used to sign blocks and messages
    /// on behalf of this miner.
    pub worker: Address,
    /// Additional addresses that are permitted to submit messages
    /// controlling this actor.
    pub control_addresses: Vec<Address>,
    /// Optional worker key to update at an epoch.
    pub pending_worker_key: Option<WorkerKeyChange>,
    /// Libp2p identity that should be used when connecting to this miner.
    #[serde(with = "strict_bytes")]
    pub peer_id: Vec<u8>,
    /// Slice of byte arrays representing Libp2p multi-addresses used for
    /// establishing a connection with this miner.
    pub multi_address: Vec<BytesDe>,
    /// The proof type used for Window PoSt for this miner.
    pub window_post_proof_type: RegisteredPoStProof,
    /// Amount of space in each sector committed by this miner.
    pub sector_size: SectorSize,
    /// The number of sectors in each Window PoSt partition (proof).
    /// Computed from the proof type and represented here redundantly.
    pub window_post_partition_sectors: u64,
    /// The next epoch this miner is eligible for certain permissioned
    /// actor methods and winning block elections as a result of being
    /// reported for a consensus fault.
    pub consensus_fault_elapsed: ChainEpoch,
    /// A proposed new owner account for this miner.
    pub pending_owner_address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize_tuple, Deserialize_tuple)]
pub struct WorkerKeyChange {
    /// Must be an ID address.
    pub new_worker: Address,
    pub effective_at: ChainEpoch,
}

/// Information stored on-chain for a pre-committed sector.
#[derive(Debug, Clone, PartialEq, Serialize_tuple, Deserialize_tuple)]
pub struct SectorPreCommitOnChainInfo {
    pub info: SectorPreCommitInfo,
    pub pre_commit_deposit: TokenAmount,
    pub pre_commit_epoch: ChainEpoch,
    /// Integral of active deals over sector lifetime.
    #[serde(with = "bigint_ser")]
    pub deal_weight: BigInt,
    /// Integral of active verified deals over sector lifetime.
    #[serde(with = "bigint_ser")]
    pub verified_deal_weight: BigInt,
}

/// Information provided by a miner when pre-committing a sector.
#[derive(Debug, Clone, PartialEq, Serialize_tuple, Deserialize_tuple)]
pub struct SectorPreCommitInfo {
    pub seal_proof: RegisteredSealProof,
    pub sector_number: SectorNumber,
    /// CommR
    pub sealed_cid: Cid,
    pub seal_rand_epoch: ChainEpoch,
    pub deal_ids: Vec<DealID>,
    pub expiration: ChainEpoch,
    /// Whether to replace a "committed capacity" no-deal sector.
    pub replace_capacity: bool,
    /// The committed capacity sector to replace, and its deadline and
    /// partition location.
    pub replace_sector_deadline: u64,
    pub replace_sector_partition: u64,
    pub replace_sector_number: SectorNumber,
}

/// Information stored on-chain for a proven sector.
#[derive(Debug, Clone, PartialEq, Serialize_tuple, Deserialize_tuple)]
pub struct SectorOnChainInfo {
    pub sector_number: SectorNumber,
    /// The seal proof type implies the PoSt proofs.
    pub seal_proof: RegisteredSealProof,
    /// CommR
    pub sealed_cid: Cid,
    pub deal_ids: Vec<DealID>,
    /// Epoch during which the sector proof was accepted.
    pub activation: ChainEpoch,
    /// Epoch during which the sector expires.
    pub expiration: ChainEpoch,
    /// Integral of active deals over sector lifetime.
    #[serde(with = "bigint_ser")]
    pub deal_weight: BigInt,
    /// Integral of active verified deals over sector lifetime.
    #[serde(with = "bigint_ser")]
    pub verified_deal_weight: BigInt,
    /// Pledge collected to commit this sector.
    pub initial_pledge: TokenAmount,
    /// Expected one day projection of reward for the sector, computed at
    /// activation time.
    pub expected_day_reward: TokenAmount,
    /// Expected twenty day projection of reward for the sector, computed
    /// at activation time.
    pub expected_storage_pledge: TokenAmount,
    /// Age of the sector this sector replaced, or zero.
    pub replaced_sector_age: ChainEpoch,
    /// Day reward of the sector this sector replaced, or zero.
    pub replaced_day_reward: TokenAmount,
}
