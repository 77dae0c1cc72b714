// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Schemas and identifiers of the builtin actors the migration touches.
//! Only the miner and power actors are rewritten by this upgrade, so
//! only their state schemas are carried here.

pub mod miner;
pub mod power;

use cid::multihash::Multihash;
use cid::Cid;
use fvm_ipld_hamt::{BytesKey, Hamt};
use fvm_shared::address::Address;

/// Map type used across builtin actor state, a HAMT indexed by byte keys.
pub type Map<BS, V> = Hamt<BS, V, BytesKey>;

/// The builtin burnt-funds actor, `f099`. Funds of deleted actors whose
/// owner cannot be located in the output tree are routed here.
pub const BURNT_FUNDS_ACTOR_ADDR: Address = Address::new_id(99);

const IPLD_RAW: u64 = 0x55;

/// Builtin actor code CIDs are identity-hashed raw blocks over the
/// `fil/<version>/<name>` label.
fn make_builtin(bz: &[u8]) -> Cid {
    Cid::new_v1(IPLD_RAW, Multihash::wrap(0, bz).expect("name too long"))
}

macro_rules! define_code_ids {
    ($version:literal) => {
        use cid::Cid;
        use lazy_static::lazy_static;

        lazy_static! {
            pub static ref SYSTEM_ACTOR_CODE_ID: Cid =
                super::make_builtin(concat!("fil/", $version, "/system").as_bytes());
            pub static ref INIT_ACTOR_CODE_ID: Cid =
                super::make_builtin(concat!("fil/", $version, "/init").as_bytes());
            pub static ref CRON_ACTOR_CODE_ID: Cid =
                super::make_builtin(concat!("fil/", $version, "/cron").as_bytes());
            pub static ref ACCOUNT_ACTOR_CODE_ID: Cid =
                super::make_builtin(concat!("fil/", $version, "/account").as_bytes());
            pub static ref POWER_ACTOR_CODE_ID: Cid =
                super::make_builtin(concat!("fil/", $version, "/storagepower").as_bytes());
            pub static ref MINER_ACTOR_CODE_ID: Cid =
                super::make_builtin(concat!("fil/", $version, "/storageminer").as_bytes());
            pub static ref MARKET_ACTOR_CODE_ID: Cid =
                super::make_builtin(concat!("fil/", $version, "/storagemarket").as_bytes());
            pub static ref PAYCH_ACTOR_CODE_ID: Cid =
                super::make_builtin(concat!("fil/", $version, "/paymentchannel").as_bytes());
            pub static ref MULTISIG_ACTOR_CODE_ID: Cid =
                super::make_builtin(concat!("fil/", $version, "/multisig").as_bytes());
            pub static ref REWARD_ACTOR_CODE_ID: Cid =
                super::make_builtin(concat!("fil/", $version, "/reward").as_bytes());
            pub static ref VERIFREG_ACTOR_CODE_ID: Cid =
                super::make_builtin(concat!("fil/", $version, "/verifiedregistry").as_bytes());
        }
    };
}

/// Code CIDs of the prior protocol version.
pub mod v5 {
    define_code_ids!("5");
}

/// Code CIDs of the target protocol version.
pub mod v6 {
    define_code_ids!("6");
}
