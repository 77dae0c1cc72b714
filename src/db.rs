// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! In-memory database and `CborStore` helpers shared by the migration
//! machinery and its tests.

use ahash::HashMap;
use anyhow::Context as _;
use cid::multihash::Code;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::CborStore;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};

/// A thread-safe `HashMap` implementation of the [`Blockstore`] trait.
/// The migration pipeline reads and writes from many worker threads, so
/// even an in-memory store has to tolerate concurrent access.
#[derive(Debug, Default)]
pub struct MemoryDB {
    blockchain_db: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl Blockstore for MemoryDB {
    fn get(&self, k: &Cid) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.blockchain_db.read().get(&k.to_bytes()).cloned())
    }

    fn put_keyed(&self, k: &Cid, block: &[u8]) -> anyhow::Result<()> {
        self.blockchain_db
            .write()
            .insert(k.to_bytes(), block.to_vec());
        Ok(())
    }

    fn has(&self, k: &Cid) -> anyhow::Result<bool> {
        Ok(self.blockchain_db.read().contains_key(&k.to_bytes()))
    }
}

/// Extension methods for [`CborStore`] that fix the multihash code all
/// state objects are stored under.
pub trait CborStoreExt: CborStore {
    /// Default multihash code is `Blake2b256`
    fn default_code() -> Code {
        Code::Blake2b256
    }

    /// A wrapper of `CborStore::put_cbor` that always uses the default
    /// multihash code.
    fn put_cbor_default<S: Serialize>(&self, obj: &S) -> anyhow::Result<Cid> {
        self.put_cbor(obj, Self::default_code())
    }

    /// A wrapper of `CborStore::get_cbor` that treats a missing object
    /// as an error.
    fn get_cbor_required<T>(&self, c: &Cid) -> anyhow::Result<T>
    where
        T: DeserializeOwned,
    {
        self.get_cbor(c)?
            .with_context(|| format!("CID {c} not found in blockstore"))
    }
}

impl<T: CborStore> CborStoreExt for T {}
