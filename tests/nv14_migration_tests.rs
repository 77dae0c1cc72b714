// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! End-to-end tests of the v5 to v6 state tree migration over an
//! in-memory store.

use std::time::Duration;

use cid::Cid;
use fil_state_migration::actors::{miner, power, v5, v6, Map, BURNT_FUNDS_ACTOR_ADDR};
use fil_state_migration::db::{CborStoreExt, MemoryDB};
use fil_state_migration::nv14::run_migration;
use fil_state_migration::{
    ActorState, MigrationCache, MigrationConfig, MigrationError, StateTree,
};
use fvm_ipld_amt::Amt;
use fvm_ipld_bitfield::BitField;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::{RegisteredPoStProof, SectorSize, StoragePower};
use fvm_shared::HAMT_BIT_WIDTH;
use num_traits::Zero;
use pretty_assertions::assert_eq;

const PRIOR_EPOCH: ChainEpoch = 1_000_000;
const POWER_ACTOR_ADDR: Address = Address::new_id(4);

const TEST_PROOF: RegisteredPoStProof = RegisteredPoStProof::StackedDRGWindow2KiBV1;
const PROD_PROOF: RegisteredPoStProof = RegisteredPoStProof::StackedDRGWindow32GiBV1;

fn config(max_workers: usize) -> MigrationConfig {
    MigrationConfig {
        max_workers,
        job_queue_size: 16,
        result_queue_size: 8,
        progress_log_period: Duration::ZERO,
    }
}

/// Builds an input state tree over the given store.
struct TreeBuilder<'db> {
    store: &'db MemoryDB,
    tree: StateTree<&'db MemoryDB>,
}

impl<'db> TreeBuilder<'db> {
    fn new(store: &'db MemoryDB) -> Self {
        Self {
            store,
            tree: StateTree::new(store),
        }
    }

    fn add_account(&mut self, id: u64, balance: u64) -> Cid {
        self.add_account_with_sequence(id, balance, 0)
    }

    fn add_account_with_sequence(&mut self, id: u64, balance: u64, sequence: u64) -> Cid {
        let head = self.store.put_cbor_default(&(id, "account")).unwrap();
        self.tree
            .set_actor(
                &Address::new_id(id),
                ActorState::new(
                    *v5::ACCOUNT_ACTOR_CODE_ID,
                    head,
                    TokenAmount::from_atto(balance),
                    sequence,
                ),
            )
            .unwrap();
        head
    }

    /// Adds a miner with no sectors and zero economic fields; `tweak`
    /// may alter the state before it is stored.
    fn add_miner(
        &mut self,
        id: u64,
        owner: u64,
        balance: u64,
        proof: RegisteredPoStProof,
        tweak: impl FnOnce(&mut miner::State),
    ) -> Cid {
        let info = miner::MinerInfo {
            owner: Address::new_id(owner),
            worker: Address::new_id(owner),
            control_addresses: Vec::new(),
            pending_worker_key: None,
            peer_id: Vec::new(),
            multi_address: Vec::new(),
            window_post_proof_type: proof,
            sector_size: SectorSize::_2KiB,
            window_post_partition_sectors: 2,
            consensus_fault_elapsed: -1,
            pending_owner_address: None,
        };
        let info_cid = self.store.put_cbor_default(&info).unwrap();

        let mut sectors = Amt::<miner::SectorOnChainInfo, _>::new(self.store);
        let sectors_cid = sectors.flush().unwrap();
        let mut pre_committed: Map<_, miner::SectorPreCommitOnChainInfo> =
            Map::new_with_bit_width(self.store, HAMT_BIT_WIDTH);
        let pre_committed_cid = pre_committed.flush().unwrap();
        // Containers the migration never dereferences.
        let opaque = self.store.put_cbor_default(&"opaque").unwrap();

        let mut state = miner::State {
            info: info_cid,
            pre_commit_deposits: TokenAmount::zero(),
            locked_funds: TokenAmount::zero(),
            vesting_funds: opaque,
            fee_debt: TokenAmount::zero(),
            initial_pledge: TokenAmount::zero(),
            pre_committed_sectors: pre_committed_cid,
            pre_committed_sectors_cleanup: opaque,
            allocated_sectors: opaque,
            sectors: sectors_cid,
            proving_period_start: 0,
            current_deadline: 0,
            deadlines: opaque,
            early_terminations: BitField::new(),
            deadline_cron_active: false,
        };
        tweak(&mut state);
        let head = self.store.put_cbor_default(&state).unwrap();
        self.tree
            .set_actor(
                &Address::new_id(id),
                ActorState::new(
                    *v5::MINER_ACTOR_CODE_ID,
                    head,
                    TokenAmount::from_atto(balance),
                    0,
                ),
            )
            .unwrap();
        head
    }

    /// Adds the power actor with one claim per `(miner id, proof, raw,
    /// qa)` entry.
    fn add_power_actor(&mut self, claims: &[(u64, RegisteredPoStProof, u64, u64)]) -> Cid {
        let mut map: Map<_, power::Claim> = Map::new_with_bit_width(self.store, HAMT_BIT_WIDTH);
        for (id, proof, raw, qa) in claims {
            power::set_claim(
                &mut map,
                &Address::new_id(*id),
                power::Claim {
                    window_post_proof_type: *proof,
                    raw_byte_power: StoragePower::from(*raw),
                    quality_adj_power: StoragePower::from(*qa),
                },
            )
            .unwrap();
        }
        let claims_cid = map.flush().unwrap();

        let state = power::State {
            miner_count: claims.len() as i64,
            miner_above_min_power_count: 0,
            claims: claims_cid,
            cron_event_queue: self.store.put_cbor_default(&"cron").unwrap(),
            ..Default::default()
        };
        let head = self.store.put_cbor_default(&state).unwrap();
        self.tree
            .set_actor(
                &POWER_ACTOR_ADDR,
                ActorState::new(*v5::POWER_ACTOR_CODE_ID, head, TokenAmount::zero(), 0),
            )
            .unwrap();
        head
    }

    fn flush(mut self) -> Cid {
        self.tree.flush().unwrap()
    }
}

fn load_tree<'db>(store: &'db MemoryDB, root: &Cid) -> StateTree<&'db MemoryDB> {
    StateTree::new_from_root(store, root).unwrap()
}

fn actor_count(tree: &StateTree<&MemoryDB>) -> u64 {
    let mut count = 0;
    tree.for_each(|_, _| {
        count += 1;
        Ok(())
    })
    .unwrap();
    count
}

fn total_balance(tree: &StateTree<&MemoryDB>) -> TokenAmount {
    let mut sum = TokenAmount::zero();
    tree.for_each(|_, actor| {
        sum += actor.balance.clone();
        Ok(())
    })
    .unwrap();
    sum
}

fn power_state(store: &MemoryDB, tree: &StateTree<&MemoryDB>) -> power::State {
    let actor = tree.get_actor(&POWER_ACTOR_ADDR).unwrap().unwrap();
    store.get_cbor_required(&actor.state).unwrap()
}

#[test]
fn pure_code_bump_preserves_head_and_balance() {
    let store = MemoryDB::default();
    let store = &store;
    let mut builder = TreeBuilder::new(store);
    let head = builder.add_account_with_sequence(100, 10, 3);
    let root = builder.flush();

    let new_root =
        run_migration(&store, &root, PRIOR_EPOCH, &config(2), MigrationCache::default()).unwrap();

    let out = load_tree(store, &new_root);
    assert_eq!(actor_count(&out), 1);
    let actor = out.get_actor(&Address::new_id(100)).unwrap().unwrap();
    assert_eq!(actor.code, *v6::ACCOUNT_ACTOR_CODE_ID);
    assert_eq!(actor.state, head);
    assert_eq!(actor.balance, TokenAmount::from_atto(10));
    assert_eq!(actor.sequence, 3);
}

#[test]
fn test_miner_is_deleted_and_balance_goes_to_owner() {
    let store = MemoryDB::default();
    let store = &store;
    let mut builder = TreeBuilder::new(store);
    builder.add_account(100, 5);
    builder.add_miner(101, 100, 7, TEST_PROOF, |_| {});
    let prod_head = builder.add_miner(102, 100, 3, PROD_PROOF, |_| {});
    builder.add_power_actor(&[(101, TEST_PROOF, 0, 0), (102, PROD_PROOF, 0, 0)]);
    let root = builder.flush();

    let in_tree = load_tree(store, &root);
    let balance_before = total_balance(&in_tree);
    let count_before = actor_count(&in_tree);

    let new_root =
        run_migration(&store, &root, PRIOR_EPOCH, &config(3), MigrationCache::default()).unwrap();

    let out = load_tree(store, &new_root);
    // The test miner is gone, everything else is one actor to one actor.
    assert_eq!(actor_count(&out), count_before - 1);
    assert_eq!(out.get_actor(&Address::new_id(101)).unwrap(), None);

    // Its whole balance moved to the owner.
    let owner = out.get_actor(&Address::new_id(100)).unwrap().unwrap();
    assert_eq!(owner.balance, TokenAmount::from_atto(12));
    assert_eq!(total_balance(&out), balance_before);

    // The production miner survives with a new code and the same head.
    let survivor = out.get_actor(&Address::new_id(102)).unwrap().unwrap();
    assert_eq!(survivor.code, *v6::MINER_ACTOR_CODE_ID);
    assert_eq!(survivor.state, prod_head);

    // The claim map lost exactly the deleted miner's entry.
    let power_out = power_state(store, &out);
    assert_eq!(power_out.miner_count, 1);
    assert_eq!(power_out.miner_above_min_power_count, 0);
    let claims = power_out.load_claims(store).unwrap();
    assert!(power::get_claim(&claims, &Address::new_id(101))
        .unwrap()
        .is_none());
    assert!(power::get_claim(&claims, &Address::new_id(102))
        .unwrap()
        .is_some());

    let power_actor = out.get_actor(&POWER_ACTOR_ADDR).unwrap().unwrap();
    assert_eq!(power_actor.code, *v6::POWER_ACTOR_CODE_ID);

    // The input tree is untouched: the deleted miner is still there
    // under its old code.
    let in_tree = load_tree(store, &root);
    let old_miner = in_tree.get_actor(&Address::new_id(101)).unwrap().unwrap();
    assert_eq!(old_miner.code, *v5::MINER_ACTOR_CODE_ID);
    assert_eq!(total_balance(&in_tree), balance_before);
}

#[test]
fn missing_owner_falls_back_to_burnt_funds_actor() {
    let store = MemoryDB::default();
    let store = &store;
    let mut builder = TreeBuilder::new(store);
    builder.add_account(99, 1); // burnt-funds actor
    builder.add_miner(101, 2000, 7, TEST_PROOF, |_| {}); // owner not in tree
    builder.add_power_actor(&[(101, TEST_PROOF, 0, 0)]);
    let root = builder.flush();

    let new_root =
        run_migration(&store, &root, PRIOR_EPOCH, &config(2), MigrationCache::default()).unwrap();

    let out = load_tree(store, &new_root);
    assert_eq!(out.get_actor(&Address::new_id(101)).unwrap(), None);
    let burnt = out.get_actor(&BURNT_FUNDS_ACTOR_ADDR).unwrap().unwrap();
    assert_eq!(burnt.balance, TokenAmount::from_atto(8));
}

#[test]
fn miner_owning_itself_falls_back_to_burnt_funds_actor() {
    let store = MemoryDB::default();
    let store = &store;
    let mut builder = TreeBuilder::new(store);
    builder.add_account(99, 0);
    builder.add_miner(101, 101, 7, TEST_PROOF, |_| {}); // its own owner
    builder.add_power_actor(&[(101, TEST_PROOF, 0, 0)]);
    let root = builder.flush();

    let new_root =
        run_migration(&store, &root, PRIOR_EPOCH, &config(2), MigrationCache::default()).unwrap();

    let out = load_tree(store, &new_root);
    assert_eq!(out.get_actor(&Address::new_id(101)).unwrap(), None);
    let burnt = out.get_actor(&BURNT_FUNDS_ACTOR_ADDR).unwrap().unwrap();
    assert_eq!(burnt.balance, TokenAmount::from_atto(7));
}

#[test]
fn test_miner_with_locked_funds_aborts_the_run() {
    let store = MemoryDB::default();
    let store = &store;
    let mut builder = TreeBuilder::new(store);
    builder.add_account(100, 5);
    builder.add_miner(102, 100, 7, TEST_PROOF, |state| {
        state.locked_funds = TokenAmount::from_atto(1);
    });
    builder.add_power_actor(&[(102, TEST_PROOF, 0, 0)]);
    let root = builder.flush();

    let err = run_migration(&store, &root, PRIOR_EPOCH, &config(2), MigrationCache::default())
        .unwrap_err();
    assert!(matches!(err, MigrationError::MigrationJobRun(_)));
    let message = err.to_string();
    assert!(message.contains("LockedFunds"), "unexpected error: {message}");
    assert!(
        message.contains(&Address::new_id(102).to_string()),
        "unexpected error: {message}"
    );
}

#[test]
fn test_miner_with_sectors_aborts_the_run() {
    let store = MemoryDB::default();
    let store = &store;
    let mut builder = TreeBuilder::new(store);

    let mut sectors = Amt::<miner::SectorOnChainInfo, _>::new(store);
    sectors
        .set(
            0,
            miner::SectorOnChainInfo {
                sector_number: 0,
                seal_proof: fvm_shared::sector::RegisteredSealProof::StackedDRG2KiBV1,
                sealed_cid: store.put_cbor_default(&"commr").unwrap(),
                deal_ids: Vec::new(),
                activation: 0,
                expiration: 100,
                deal_weight: Zero::zero(),
                verified_deal_weight: Zero::zero(),
                initial_pledge: TokenAmount::zero(),
                expected_day_reward: TokenAmount::zero(),
                expected_storage_pledge: TokenAmount::zero(),
                replaced_sector_age: 0,
                replaced_day_reward: TokenAmount::zero(),
            },
        )
        .unwrap();
    let sectors_cid = sectors.flush().unwrap();

    builder.add_miner(103, 100, 0, TEST_PROOF, |state| {
        state.sectors = sectors_cid;
    });
    let root = builder.flush();

    let err = run_migration(&store, &root, PRIOR_EPOCH, &config(2), MigrationCache::default())
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Sectors"), "unexpected error: {message}");
}

#[test]
fn test_miner_claim_with_power_aborts_the_run() {
    let store = MemoryDB::default();
    let store = &store;
    let mut builder = TreeBuilder::new(store);
    builder.add_account(100, 5);
    builder.add_miner(101, 100, 0, TEST_PROOF, |_| {});
    builder.add_power_actor(&[(101, TEST_PROOF, 1, 0)]);
    let root = builder.flush();

    let err = run_migration(&store, &root, PRIOR_EPOCH, &config(2), MigrationCache::default())
        .unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("nonzero power"),
        "unexpected error: {message}"
    );
}

#[test]
fn unregistered_code_aborts_the_run() {
    let store = MemoryDB::default();
    let store = &store;
    let mut builder = TreeBuilder::new(store);
    let head = store.put_cbor_default(&"stranger").unwrap();
    // A v6 code CID can never appear in a v5 input tree.
    builder
        .tree
        .set_actor(
            &Address::new_id(100),
            ActorState::new(*v6::ACCOUNT_ACTOR_CODE_ID, head, TokenAmount::zero(), 0),
        )
        .unwrap();
    let root = builder.flush();

    let err = run_migration(&store, &root, PRIOR_EPOCH, &config(2), MigrationCache::default())
        .unwrap_err();
    assert!(matches!(err, MigrationError::MigratorNotFound(_)));
    assert!(err
        .to_string()
        .contains("no registered migration function"));
}

#[test]
fn zero_workers_is_an_invalid_config() {
    let store = MemoryDB::default();
    let store = &store;
    let root = TreeBuilder::new(store).flush();

    let err = run_migration(&store, &root, PRIOR_EPOCH, &config(0), MigrationCache::default())
        .unwrap_err();
    assert!(matches!(err, MigrationError::InvalidConfig(0)));
    assert!(err.to_string().contains("invalid migration config"));
}

#[test]
fn empty_tree_migrates_to_empty_tree() {
    let store = MemoryDB::default();
    let store = &store;
    let root = TreeBuilder::new(store).flush();

    let new_root =
        run_migration(&store, &root, PRIOR_EPOCH, &config(2), MigrationCache::default()).unwrap();

    let out = load_tree(store, &new_root);
    assert_eq!(actor_count(&out), 0);
    // An empty output tree has the canonical empty root.
    assert_eq!(new_root, StateTree::new(store).flush().unwrap());
}

fn thousand_actor_tree(store: &MemoryDB) -> Cid {
    let mut builder = TreeBuilder::new(store);
    for id in 100..1100 {
        builder.add_account(id, id);
    }
    builder.add_power_actor(&[(2000, PROD_PROOF, 10, 10)]);
    builder.flush()
}

#[test]
fn root_is_deterministic_for_any_worker_count() {
    let store = MemoryDB::default();
    let store = &store;
    let root = thousand_actor_tree(store);

    let mut roots = Vec::new();
    for max_workers in [1, 2, 8] {
        let new_root = run_migration(
            &store,
            &root,
            PRIOR_EPOCH,
            &config(max_workers),
            MigrationCache::default(),
        )
        .unwrap();
        roots.push(new_root);
    }
    assert_eq!(roots[0], roots[1]);
    assert_eq!(roots[1], roots[2]);
}

#[test]
fn warm_cache_produces_the_identical_root() {
    let store = MemoryDB::default();
    let store = &store;
    let root = thousand_actor_tree(store);

    let cache = MigrationCache::default();
    let cold = run_migration(&store, &root, PRIOR_EPOCH, &config(4), cache.clone()).unwrap();
    // Only the cached power migration is memoised; nil migrations never
    // touch the cache.
    assert_eq!(cache.len(), 1);

    let warm = run_migration(&store, &root, PRIOR_EPOCH, &config(4), cache.clone()).unwrap();
    assert_eq!(cold, warm);
    assert_eq!(cache.len(), 1);
}

#[test]
fn progress_logging_period_does_not_disturb_the_run() {
    let store = MemoryDB::default();
    let store = &store;
    let root = thousand_actor_tree(store);

    let without_progress =
        run_migration(&store, &root, PRIOR_EPOCH, &config(2), MigrationCache::default()).unwrap();
    let with_progress = run_migration(
        &store,
        &root,
        PRIOR_EPOCH,
        &MigrationConfig {
            progress_log_period: Duration::from_millis(5),
            ..config(2)
        },
        MigrationCache::default(),
    )
    .unwrap();
    assert_eq!(without_progress, with_progress);
}
