use crate::types::chain::Asset;
use solana_sdk::commitment_config::CommitmentLevel;

pub const RPC_COMMITMENT_LEVEL: CommitmentLevel = CommitmentLevel::Confirmed;

// Redis key prefixes
pub const SCAN_COOLDOWN_KEY_PREFIX: &str = "scan_cooldown:";
pub const SWEEP_LOCK_KEY_PREFIX: &str = "sweep_lock:";

// Scan defaults
pub const DEFAULT_SCAN_COOLDOWN_S: u64 = 30;
pub const DEFAULT_CHAIN_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_EVM_LOOKBACK_BLOCKS: u64 = 1000;

pub const DEFAULT_DB_POOL_SIZE: usize = 16;
pub const DEFAULT_REDIS_CONNECTION_TIMEOUT_MS: u64 = 500;

// Solana fee and rent figures, in lamports
pub const BASE_TX_FEE_LAMPORTS: u64 = 5000;
pub const TOKEN_ACCOUNT_RENT_LAMPORTS: u64 = 2039280;
pub const NEW_ACCOUNT_THRESHOLD_LAMPORTS: u64 = 890880;
pub const SOL_DECIMALS: u8 = 9;

// EVM gas limits used when estimation is unavailable
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;
pub const ERC20_TRANSFER_GAS: u64 = 65_000;

pub const FUNDING_POLL_INTERVAL_MS: u64 = 1500;
pub const BASELINE_SETTLE_ATTEMPTS: u32 = 3;
pub const BASELINE_SETTLE_BACKOFF_MS: u64 = 200;
pub const EVM_PROVIDER_POLL_INTERVAL_MS: u64 = 2000;

/// USD values are stored with this many fractional digits.
pub const USD_SCALE: u32 = 8;

/// Price source identifiers, stablecoins never reach the price source.
pub fn coingecko_id(asset: Asset) -> Option<&'static str> {
    match asset {
        Asset::Eth => Some("ethereum"),
        Asset::Bnb => Some("binancecoin"),
        Asset::Pol => Some("polygon-ecosystem-token"),
        Asset::Sol => Some("solana"),
        Asset::Usdc | Asset::Usdt => None,
    }
}
