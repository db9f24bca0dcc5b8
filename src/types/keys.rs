use anyhow::{bail, Result};
use ethers::signers::coins_bip39::{English, Mnemonic};
use solana_sdk::signature::{Keypair, Signer};
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use zeroize::Zeroizing;

/// The single HD master secret every deposit address is derived from.
/// Loaded once at startup and only handed to the sweepers.
#[derive(Clone)]
pub struct HdSeed {
    phrase: Arc<Zeroizing<String>>,
}

impl Debug for HdSeed {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "HdSeed(<hidden>)")
    }
}

impl HdSeed {
    pub fn from_phrase(phrase: &str) -> Result<Self> {
        let normalized = Zeroizing::new(phrase.split_whitespace().collect::<Vec<_>>().join(" "));
        if Mnemonic::<English>::new_from_phrase(normalized.as_str()).is_err() {
            bail!("HD mnemonic is not a valid BIP-39 phrase");
        }
        Ok(Self {
            phrase: Arc::new(normalized),
        })
    }

    pub(crate) fn phrase(&self) -> &str {
        self.phrase.as_str()
    }

    /// BIP-39 seed bytes (empty passphrase), wiped on drop.
    pub(crate) fn seed_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(
            solana_sdk::signer::keypair::generate_seed_from_seed_phrase_and_passphrase(
                self.phrase.as_str(),
                "",
            ),
        )
    }
}

/// Treasury signers used to pre-fund deposit addresses with gas.
#[derive(Clone)]
pub struct TreasuryKeys {
    pub evm_private_key: Option<Arc<Zeroizing<String>>>,
    pub solana: Option<Arc<Keypair>>,
}

impl Debug for TreasuryKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreasuryKeys")
            .field("evm_private_key", &self.evm_private_key.as_ref().map(|_| "<hidden>"))
            .field("solana", &self.solana.as_ref().map(|k| k.pubkey().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_garbage_phrase() {
        assert!(HdSeed::from_phrase("not a mnemonic at all").is_err());
    }

    #[test]
    fn test_normalizes_whitespace_and_hides_debug() {
        let seed = HdSeed::from_phrase(
            "test  test test test test test test test test test test\n junk",
        )
        .unwrap();
        assert_eq!(seed.phrase().split(' ').count(), 12);
        assert_eq!(format!("{:?}", seed), "HdSeed(<hidden>)");
        assert_eq!(seed.seed_bytes().len(), 64);
    }
}
