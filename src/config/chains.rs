use crate::config::constants::RPC_COMMITMENT_LEVEL;
use crate::config::settings::{ChainConfig, Settings};
use crate::evm::scanner::EvmScanner;
use crate::evm::sweeper::EvmSweeper;
use crate::evm::EvmClient;
use crate::solana::rpc_pool::RpcClientPool;
use crate::solana::scanner::SolanaScanner;
use crate::solana::sweeper::SolanaSweeper;
use crate::types::chain::Chain;
use crate::types::engine::{ChainScanner, ChainSweeper};
use crate::types::keys::{HdSeed, TreasuryKeys};
use anyhow::{anyhow, Result};
use solana_sdk::signature::Signer;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Chain clients resolved once from the `chains` table, shared by scanners and sweepers.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    configs: HashMap<Chain, ChainConfig>,
    solana: Option<RpcClientPool>,
    evm: HashMap<Chain, EvmClient>,
}

impl ChainRegistry {
    pub fn new(chains: &HashMap<Chain, ChainConfig>) -> Result<Self> {
        let mut solana = None;
        let mut evm = HashMap::new();
        for (chain, chain_config) in chains {
            if chain.is_evm() {
                evm.insert(*chain, EvmClient::new(*chain, chain_config)?);
            } else {
                solana = Some(RpcClientPool::new(&chain_config.rpcs, RPC_COMMITMENT_LEVEL));
            }
        }
        let mut configured: Vec<_> = chains.keys().collect();
        configured.sort();
        info!("Configured chains: {:?}", configured);
        Ok(Self {
            configs: chains.clone(),
            solana,
            evm,
        })
    }

    pub fn chains(&self) -> Vec<Chain> {
        let mut chains: Vec<Chain> = self.configs.keys().copied().collect();
        chains.sort();
        chains
    }

    fn config(&self, chain: Chain) -> Result<&ChainConfig> {
        self.configs
            .get(&chain)
            .ok_or_else(|| anyhow!("{} is not configured", chain))
    }

    pub fn scanners(
        &self,
        settings: &Settings,
        treasury: &TreasuryKeys,
    ) -> Result<HashMap<Chain, Arc<dyn ChainScanner>>> {
        let mut scanners: HashMap<Chain, Arc<dyn ChainScanner>> = HashMap::new();
        for (chain, client) in &self.evm {
            let scanner = EvmScanner::new(client.clone(), self.config(*chain)?, settings.scan.evm_lookback_blocks)?;
            scanners.insert(*chain, Arc::new(scanner));
        }
        if let Some(rpc_pool) = &self.solana {
            // treasury funding transfers land on deposit addresses but are not deposits
            let ignored: HashSet<String> = treasury
                .solana
                .iter()
                .map(|keypair| keypair.pubkey().to_string())
                .collect();
            let scanner = SolanaScanner::new(
                rpc_pool.clone(),
                self.config(Chain::Solana)?,
                settings.scan.solana_signature_limit,
                ignored,
            );
            scanners.insert(Chain::Solana, Arc::new(scanner));
        }
        Ok(scanners)
    }

    pub fn sweepers(
        &self,
        settings: &Settings,
        seed: &HdSeed,
        treasury: &TreasuryKeys,
    ) -> Result<HashMap<Chain, Arc<dyn ChainSweeper>>> {
        let funding_timeout = Duration::from_secs(settings.sweep.funding_timeout_s);
        let mut sweepers: HashMap<Chain, Arc<dyn ChainSweeper>> = HashMap::new();
        for (chain, client) in &self.evm {
            let sweeper = EvmSweeper::new(
                client.clone(),
                self.config(*chain)?,
                seed.clone(),
                treasury.evm_private_key.as_ref().map(|key| key.as_str()),
                funding_timeout,
            )?;
            sweepers.insert(*chain, Arc::new(sweeper));
        }
        if let Some(rpc_pool) = &self.solana {
            let sweeper = SolanaSweeper::new(
                rpc_pool.clone(),
                self.config(Chain::Solana)?,
                seed.clone(),
                treasury.solana.clone(),
                funding_timeout,
            )?;
            sweepers.insert(Chain::Solana, Arc::new(sweeper));
        }
        Ok(sweepers)
    }
}
