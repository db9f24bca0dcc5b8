use crate::types::errors::SweepError;
use crate::types::keys::HdSeed;
use anyhow::{anyhow, bail, Result};
use ethers::signers::coins_bip39::English;
use ethers::signers::{LocalWallet, MnemonicBuilder, Signer as EvmSigner};
use ethers::types::Address;
use solana_sdk::bs58;
use solana_sdk::derivation_path::DerivationPath;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::signer::keypair::{keypair_from_seed, keypair_from_seed_and_derivation_path};
use tracing::error;
use zeroize::Zeroizing;

/// m/44'/60'/0'/0/{index}, the standard external chain for EVM accounts
pub fn evm_derivation_path(index: u32) -> String {
    format!("m/44'/60'/0'/0/{index}")
}

/// m/44'/501'/{index}'/0', all hardened as ed25519 requires
pub fn solana_derivation_path(index: u32) -> DerivationPath {
    DerivationPath::new_bip44(Some(index), Some(0))
}

pub fn derive_solana_keypair(seed: &HdSeed, index: u32) -> Result<Keypair> {
    let seed_bytes = seed.seed_bytes();
    keypair_from_seed_and_derivation_path(&seed_bytes, Some(solana_derivation_path(index)))
        .map_err(|e| anyhow!("Solana derivation failed for index {index}: {e}"))
}

pub fn derive_evm_wallet(seed: &HdSeed, index: u32) -> Result<LocalWallet> {
    MnemonicBuilder::<English>::default()
        .phrase(seed.phrase())
        .derivation_path(&evm_derivation_path(index))?
        .build()
        .map_err(|e| anyhow!("EVM derivation failed for index {index}: {e}"))
}

pub fn format_evm_address(address: &Address) -> String {
    ethers::utils::to_checksum(address, None)
}

fn checked_index(index: i32) -> Result<u32, SweepError> {
    u32::try_from(index).map_err(|_| SweepError::Derivation(format!("negative index {index}")))
}

fn mismatch(expected: &str, derived: String, index: i32) -> SweepError {
    error!(
        "DERIVED ADDRESS MISMATCH: stored {} but index {} derives {}, refusing to sign",
        expected, index, derived
    );
    SweepError::AddressMismatch {
        expected: expected.to_string(),
        derived,
        index,
    }
}

/// Derive the signer for a stored Solana deposit address and check it really owns it.
pub fn derive_verified_solana_keypair(
    seed: &HdSeed,
    index: i32,
    expected: &str,
) -> Result<Keypair, SweepError> {
    let keypair = derive_solana_keypair(seed, checked_index(index)?)
        .map_err(|e| SweepError::Derivation(e.to_string()))?;
    let derived = keypair.pubkey().to_string();
    if derived != expected {
        return Err(mismatch(expected, derived, index));
    }
    Ok(keypair)
}

/// EVM addresses are compared case-insensitively, checksum casing is presentation only.
pub fn derive_verified_evm_wallet(
    seed: &HdSeed,
    index: i32,
    expected: &str,
) -> Result<LocalWallet, SweepError> {
    let wallet = derive_evm_wallet(seed, checked_index(index)?)
        .map_err(|e| SweepError::Derivation(e.to_string()))?;
    let derived = format_evm_address(&wallet.address());
    if !derived.eq_ignore_ascii_case(expected.trim()) {
        return Err(mismatch(expected, derived, index));
    }
    Ok(wallet)
}

/// Accepts either a 64-byte keypair or a 32-byte secret, base58 encoded.
pub fn keypair_from_base58_string(privkey: &str) -> Result<Keypair> {
    let secret_key_bytes = match bs58::decode(privkey.trim()).into_vec() {
        Ok(bytes) => Zeroizing::new(bytes),
        Err(e) => {
            error!("Failed to decode base58 key: {:?}", e);
            bail!("Failed to decode base58 string");
        }
    };

    match secret_key_bytes.len() {
        64 => Ok(Keypair::from_bytes(&secret_key_bytes)?),
        32 => keypair_from_seed(&secret_key_bytes).map_err(|e| anyhow!("Invalid secret key: {e}")),
        _ => bail!("Invalid length for secret key"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV_MNEMONIC: &str = "test test test test test test test test test test test junk";

    fn seed() -> HdSeed {
        HdSeed::from_phrase(DEV_MNEMONIC).unwrap()
    }

    #[test]
    fn test_evm_derivation_matches_known_accounts() {
        let first = derive_evm_wallet(&seed(), 0).unwrap();
        let second = derive_evm_wallet(&seed(), 1).unwrap();
        assert_eq!(
            format_evm_address(&first.address()),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
        assert_eq!(
            format_evm_address(&second.address()),
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
        );
    }

    #[test]
    fn test_solana_derivation_is_deterministic_and_index_sensitive() {
        let a = derive_solana_keypair(&seed(), 7).unwrap();
        let b = derive_solana_keypair(&seed(), 7).unwrap();
        let c = derive_solana_keypair(&seed(), 8).unwrap();
        assert_eq!(a.pubkey(), b.pubkey());
        assert_ne!(a.pubkey(), c.pubkey());
    }

    #[test]
    fn test_verified_evm_wallet_accepts_any_casing() {
        let lower = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
        assert!(derive_verified_evm_wallet(&seed(), 0, lower).is_ok());
    }

    #[test]
    fn test_mismatch_is_fatal() {
        let err = derive_verified_evm_wallet(
            &seed(),
            1,
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
        )
        .unwrap_err();
        assert!(err.is_fatal());

        let other = derive_solana_keypair(&seed(), 3).unwrap().pubkey().to_string();
        let err = derive_verified_solana_keypair(&seed(), 4, &other).unwrap_err();
        assert!(matches!(err, SweepError::AddressMismatch { index: 4, .. }));
    }

    #[test]
    fn test_negative_index_is_rejected() {
        let err = derive_verified_solana_keypair(&seed(), -1, "x").unwrap_err();
        assert!(matches!(err, SweepError::Derivation(_)));
    }

    #[test]
    fn test_keypair_from_base58_roundtrip() {
        let keypair = Keypair::new();
        let encoded = bs58::encode(keypair.to_bytes()).into_string();
        let parsed = keypair_from_base58_string(&encoded).unwrap();
        assert_eq!(parsed.pubkey(), keypair.pubkey());
        assert!(keypair_from_base58_string("abc").is_err());
    }
}
