// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Parallel state tree migration engine for the actors v5 to v6 network
//! upgrade.
//!
//! The state tree is a content-addressed mapping from actor address to
//! actor record. The migration rewrites every record under a new code
//! CID, repairs the power actor's claim map, and deletes the
//! test-proof-type miners that can no longer exist after the upgrade,
//! transferring their balances to their owners (or to the burnt-funds
//! actor when no owner survives).
//!
//! Common machinery lives in [`common`]; the upgrade-specific migrators
//! and their registration live in [`nv14`]. The entry point is
//! [`nv14::run_migration`].

pub mod actors;
pub mod common;
pub mod db;
pub mod nv14;
pub mod state_tree;

use cid::Cid;
use rayon::ThreadPoolBuildError;

pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(thiserror::Error, Debug)]
pub enum MigrationError {
    #[error("invalid migration config with {0} workers")]
    InvalidConfig(usize),
    #[error("Failed creating job for state migration: {0}")]
    MigrationJobCreate(String),
    #[error("Failed running job for state migration: {0}")]
    MigrationJobRun(String),
    #[error("Flush failed post migration: {0}")]
    FlushFailed(String),
    #[error("Failed reading from blockstore: {0}")]
    BlockStoreRead(String),
    #[error("actor with code {0} has no registered migration function")]
    MigratorNotFound(Cid),
    #[error("Failed updating new actor state: {0}")]
    SetActorState(String),
    #[error("State tree creation failed: {0}")]
    StateTreeCreation(String),
    #[error("Incomplete migration specification with {0} code CIDs")]
    IncompleteMigrationSpec(usize),
    #[error("Balance transfer for deleted actor failed: {0}")]
    BalanceTransfer(String),
    #[error("Thread pool creation failed: {0}")]
    ThreadPoolCreation(#[from] ThreadPoolBuildError),
}

pub use common::{
    actor_head_key, ActorMigration, ActorMigrationInput, ActorMigrationOutput, BalanceTransfer,
    MigrationCache, MigrationConfig, Migrator,
};
pub use state_tree::{ActorState, StateTree};
