// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! State tree implementation using hamt.

use anyhow::anyhow;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_hamt::Hamt;
use fvm_shared::{address::Address, econ::TokenAmount, HAMT_BIT_WIDTH};

/// State of all actor implementations.
#[derive(PartialEq, Clone, Debug, Serialize_tuple, Deserialize_tuple)]
pub struct ActorState {
    /// Link to code for the actor.
    pub code: Cid,
    /// Link to the state of the actor.
    pub state: Cid,
    /// Sequence of the actor.
    pub sequence: u64,
    /// Tokens available to the actor.
    pub balance: TokenAmount,
}

impl ActorState {
    pub fn new(code: Cid, state: Cid, balance: TokenAmount, sequence: u64) -> Self {
        Self {
            code,
            state,
            sequence,
            balance,
        }
    }
}

/// A mapping from actor address to [`ActorState`], persisted as a HAMT
/// rooted at a single CID. During a migration two trees exist: the
/// input tree, which is never mutated, and the output tree, which is
/// written by a single thread and flushed once the migration completes.
pub struct StateTree<BS> {
    hamt: Hamt<BS, ActorState>,
}

impl<BS> StateTree<BS>
where
    BS: Blockstore,
{
    /// Constructor for a new, empty state tree.
    pub fn new(store: BS) -> Self {
        Self {
            hamt: Hamt::new_with_bit_width(store, HAMT_BIT_WIDTH),
        }
    }

    /// Constructor for a hamt state tree given an IPLD store and a root CID.
    pub fn new_from_root(store: BS, root: &Cid) -> anyhow::Result<Self> {
        let hamt = Hamt::load_with_bit_width(root, store, HAMT_BIT_WIDTH)
            .map_err(|e| anyhow!("failed to load state tree {root}: {e}"))?;
        Ok(Self { hamt })
    }

    /// Retrieve store reference.
    pub fn store(&self) -> &BS {
        self.hamt.store()
    }

    /// Get actor state from an address.
    pub fn get_actor(&self, addr: &Address) -> anyhow::Result<Option<ActorState>> {
        Ok(self
            .hamt
            .get(&addr.to_bytes())
            .map_err(|e| anyhow!("failed to get actor {addr}: {e}"))?
            .cloned())
    }

    /// Set actor state for an address.
    pub fn set_actor(&mut self, addr: &Address, actor: ActorState) -> anyhow::Result<()> {
        self.hamt
            .set(addr.to_bytes().into(), actor)
            .map_err(|e| anyhow!("failed to set actor {addr}: {e}"))?;
        Ok(())
    }

    /// Iterates over all actors in the tree, in traversal order.
    pub fn for_each<F>(&self, mut f: F) -> anyhow::Result<()>
    where
        F: FnMut(Address, &ActorState) -> anyhow::Result<()>,
    {
        self.hamt
            .for_each(|key, actor| {
                let addr = Address::from_bytes(key)?;
                f(addr, actor)
            })
            .map_err(|e| anyhow!("state tree iteration failed: {e}"))
    }

    /// Flushes the tree and returns the root CID.
    pub fn flush(&mut self) -> anyhow::Result<Cid> {
        self.hamt
            .flush()
            .map_err(|e| anyhow!("failed to flush state tree: {e}"))
    }
}
