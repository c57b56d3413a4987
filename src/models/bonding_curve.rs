//! Bonding Curve account layout (spec.md §3 "Bonding Curve Account").
//!
//! Fixed-width binary layout: an 8-byte Anchor account discriminator
//! followed by five little-endian `u64`s, a `bool`, and a 32-byte pubkey.

use borsh::BorshDeserialize;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Discriminator for the pump.fun `BondingCurve` account (spec.md §6).
pub const BONDING_CURVE_DISCRIMINATOR: [u8; 8] = [23, 183, 248, 55, 96, 216, 172, 96];

/// The on-chain state of a pump.fun bonding curve account.
#[derive(BorshDeserialize, Debug, Clone, Serialize, Deserialize)]
pub struct BondingCurveAccount {
    pub virtual_token_reserves: u64,
    pub virtual_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub token_total_supply: u64,
    pub complete: bool,
    pub creator: Pubkey,
}

impl BondingCurveAccount {
    /// Decode raw account bytes, validating and stripping the discriminator.
    /// Returns `None` on any length mismatch or decode failure — mirrors the
    /// parser's error policy of dropping rather than propagating (spec.md §4.3).
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 8 || data[0..8] != BONDING_CURVE_DISCRIMINATOR {
            return None;
        }
        Self::try_from_slice(&data[8..]).ok()
    }
}
