//! Program ids and discriminators (spec.md §6 "Program-specific wire constants").

pub const PUMP_BC_PROGRAM_ID: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";
pub const PUMP_AMM_PROGRAM_ID: &str = "pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA";
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

pub const BC_TRADE_EVENT_DISCRIMINATOR: [u8; 8] = [232, 219, 223, 41, 219, 236, 220, 190];
pub const BC_CREATE_EVENT_DISCRIMINATOR: [u8; 8] = [23, 30, 248, 169, 150, 79, 226, 150];
pub const BC_COMPLETE_EVENT_DISCRIMINATOR: [u8; 8] = [23, 30, 248, 169, 150, 79, 226, 178];

pub const AMM_BUY_DISCRIMINATOR: [u8; 8] = [102, 6, 61, 18, 1, 218, 235, 234];
pub const AMM_SELL_DISCRIMINATOR: [u8; 8] = [51, 230, 133, 164, 1, 127, 131, 173];
pub const AMM_DEPOSIT_DISCRIMINATOR: [u8; 8] = [242, 35, 198, 137, 82, 225, 242, 182];
pub const AMM_WITHDRAW_DISCRIMINATOR: [u8; 8] = [183, 18, 70, 156, 148, 109, 161, 34];
pub const AMM_CREATE_POOL_DISCRIMINATOR: [u8; 8] = [233, 146, 209, 142, 207, 104, 64, 188];

/// SPL Token Program `Transfer`/`TransferChecked` instruction tags, used by
/// the inner-instruction transfer-tree scan in the AMM trade strategy.
pub const SPL_TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const SPL_TOKEN_TRANSFER_TAG: u8 = 3;
pub const SPL_TOKEN_TRANSFER_CHECKED_TAG: u8 = 12;

/// Graduation liquidity band, in lamports of virtual SOL reserves.
pub const GRADUATION_BAND_LOW_LAMPORTS: u64 = 30_000_000_000;
pub const GRADUATION_BAND_HIGH_LAMPORTS: u64 = 85_000_000_000;

/// Default token decimals when a mint's decimals aren't otherwise known.
pub const DEFAULT_TOKEN_DECIMALS: u8 = 6;

/// Default circulating supply assumption for a freshly-created BC token
/// (10^9 tokens at 6 decimals), used only until the real
/// `token_total_supply` is observed on the bonding curve account.
pub const DEFAULT_TOTAL_SUPPLY_RAW: u64 = 1_000_000_000_000_000;

/// AMM realized-amount heuristic bounds, in SOL (spec.md §4.3).
pub const AMM_HEURISTIC_MIN_SOL: f64 = 0.001;
pub const AMM_HEURISTIC_MAX_SOL: f64 = 1000.0;
