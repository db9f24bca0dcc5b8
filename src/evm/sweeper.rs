use crate::config::constants::{ERC20_TRANSFER_GAS, FUNDING_POLL_INTERVAL_MS, NATIVE_TRANSFER_GAS};
use crate::config::settings::ChainConfig;
use crate::evm::{parse_address, Erc20, EvmClient};
use crate::services::sweep::{funding_shortfall, native_sweep_amount};
use crate::storage::DepositStore;
use crate::types::chain::{Asset, Chain};
use crate::types::deposit::DepositAddress;
use crate::types::engine::ChainSweeper;
use crate::types::errors::SweepError;
use crate::types::keys::HdSeed;
use crate::types::sweep::SweepOutcome;
use crate::utils::keys::derive_verified_evm_wallet;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, JsonRpcClient, Middleware};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionReceipt, TransactionRequest, U256};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

fn rpc_err(e: impl std::fmt::Display) -> SweepError {
    SweepError::Rpc(e.to_string())
}

fn to_u128(value: U256) -> Result<u128, SweepError> {
    u128::try_from(value).map_err(|_| SweepError::Rpc(format!("{value} out of range")))
}

fn confirmed(receipt: Option<TransactionReceipt>) -> Result<TransactionReceipt, SweepError> {
    let receipt = receipt.ok_or_else(|| SweepError::Rpc("transaction dropped from mempool".to_string()))?;
    if receipt.status.is_some_and(|s| s.is_zero()) {
        return Err(SweepError::Rpc(format!("transaction {:#x} reverted", receipt.transaction_hash)));
    }
    Ok(receipt)
}

/// What a confirmed transaction cost its sender: gas at the effective price, or `estimate` when
/// the node leaves those out, plus the L1 data fee rollups report next to it.
pub fn receipt_cost(receipt: &TransactionReceipt, estimate: U256) -> U256 {
    let gas_fee = match (receipt.gas_used, receipt.effective_gas_price) {
        (Some(gas), Some(price)) => gas.saturating_mul(price),
        _ => estimate,
    };
    let l1_fee = receipt
        .other
        .get_deserialized::<U256>("l1Fee")
        .and_then(|fee| fee.ok())
        .unwrap_or_default();
    gas_fee.saturating_add(l1_fee)
}

/// Legacy transactions with an explicit gas price, so the fee is exactly gas limit times price.
pub struct EvmSweeper<P: JsonRpcClient = Http> {
    client: EvmClient<P>,
    seed: HdSeed,
    treasury: Option<LocalWallet>,
    vault: Address,
    tokens: HashMap<Asset, Address>,
    native_buffer: u128,
    funding_timeout: Duration,
}

impl<P: JsonRpcClient + Clone + 'static> EvmSweeper<P> {
    pub fn new(
        client: EvmClient<P>,
        chain_config: &ChainConfig,
        seed: HdSeed,
        treasury_private_key: Option<&str>,
        funding_timeout: Duration,
    ) -> Result<Self> {
        let treasury = treasury_private_key
            .map(|key| {
                LocalWallet::from_str(key.trim().trim_start_matches("0x"))
                    .map(|w| w.with_chain_id(client.chain_id))
                    .map_err(|e| anyhow!("Invalid EVM treasury key: {}", e))
            })
            .transpose()?;
        let tokens = chain_config
            .tokens
            .iter()
            .map(|t| Ok((t.asset, parse_address(&t.address)?)))
            .collect::<Result<_>>()?;
        Ok(Self {
            vault: parse_address(&chain_config.vault_address)?,
            client,
            seed,
            treasury,
            tokens,
            native_buffer: chain_config.native_buffer as u128,
            funding_timeout,
        })
    }

    async fn estimate_gas(&self, tx: TypedTransaction, fallback: u64) -> U256 {
        match self.client.provider.estimate_gas(&tx, None).await {
            Ok(gas) => gas,
            Err(e) => {
                debug!("Gas estimation failed, using {}: {}", fallback, e);
                U256::from(fallback)
            }
        }
    }

    #[instrument(skip(self, wallet), fields(chain = %self.client.chain, owner = ?wallet.address()))]
    async fn sweep_native(&self, wallet: LocalWallet, claimed: u128) -> Result<SweepOutcome, SweepError> {
        let owner = wallet.address();
        let provider = self.client.provider.as_ref();
        let balance = provider.get_balance(owner, None).await.map_err(rpc_err)?;
        if balance.is_zero() {
            return Err(SweepError::NothingToSweep(format!("{:?}", owner)));
        }
        let gas_price = provider.get_gas_price().await.map_err(rpc_err)?;
        let template = TransactionRequest::new().from(owner).to(self.vault).value(U256::zero());
        let gas = self.estimate_gas(template.into(), NATIVE_TRANSFER_GAS).await;
        let fee = gas
            .checked_mul(gas_price)
            .ok_or_else(|| SweepError::Rpc("fee overflow".to_string()))?;

        let amount = native_sweep_amount(to_u128(balance)?, to_u128(fee)?, self.native_buffer)?.min(claimed);
        let tx = TransactionRequest::new()
            .from(owner)
            .to(self.vault)
            .value(U256::from(amount))
            .gas(gas)
            .gas_price(gas_price);
        let signer = SignerMiddleware::new(provider.clone(), wallet);
        let pending = signer.send_transaction(tx, None).await.map_err(rpc_err)?;
        let receipt = confirmed(pending.await.map_err(rpc_err)?)?;
        let tx_hash = format!("{:#x}", receipt.transaction_hash);
        info!("Swept {} wei from {:?} in {}", amount, owner, tx_hash);

        Ok(SweepOutcome {
            tx_hash,
            native_spent: amount.saturating_add(to_u128(receipt_cost(&receipt, fee))?),
        })
    }

    #[instrument(skip(self, wallet, baselines), fields(chain = %self.client.chain, owner = ?wallet.address()))]
    async fn sweep_token(
        &self,
        wallet: LocalWallet,
        address_id: i32,
        asset: Asset,
        claimed: u128,
        baselines: &dyn DepositStore,
    ) -> Result<SweepOutcome, SweepError> {
        let contract_address = *self
            .tokens
            .get(&asset)
            .ok_or_else(|| SweepError::UnsupportedAsset(asset.to_string()))?;
        let owner = wallet.address();
        let provider = self.client.provider.clone();
        let token = Erc20::new(contract_address, provider.clone());
        let held = token.balance_of(owner).call().await.map_err(rpc_err)?;
        if held.is_zero() {
            return Err(SweepError::NothingToSweep(format!("{} on {:?}", asset, owner)));
        }
        let amount = held.min(U256::from(claimed));

        let gas_price = provider.get_gas_price().await.map_err(rpc_err)?;
        let template = token.transfer(self.vault, amount).from(owner).legacy();
        let gas = self.estimate_gas(template.tx, ERC20_TRANSFER_GAS).await;
        let fee = gas
            .checked_mul(gas_price)
            .ok_or_else(|| SweepError::Rpc("fee overflow".to_string()))?;
        let balance = provider.get_balance(owner, None).await.map_err(rpc_err)?;
        let shortfall = funding_shortfall(to_u128(balance)?, to_u128(fee)?);
        if shortfall > 0 {
            self.fund(address_id, owner, shortfall, fee, baselines).await?;
        }

        let signer = Arc::new(SignerMiddleware::new(provider.as_ref().clone(), wallet));
        let token = Erc20::new(contract_address, signer);
        let call = token
            .transfer(self.vault, amount)
            .legacy()
            .gas(gas)
            .gas_price(gas_price);
        let pending = call.send().await.map_err(rpc_err)?;
        let receipt = confirmed(pending.await.map_err(rpc_err)?)?;
        let tx_hash = format!("{:#x}", receipt.transaction_hash);
        info!("Swept {} {} from {:?} in {}", amount, asset, owner, tx_hash);

        Ok(SweepOutcome {
            tx_hash,
            native_spent: to_u128(receipt_cost(&receipt, fee))?,
        })
    }

    /// Sends the missing gas from the treasury and waits until the address can pay `required`.
    /// The baseline is raised first, so no scan mistakes the top-up for a deposit.
    async fn fund(
        &self,
        address_id: i32,
        target: Address,
        shortfall: u128,
        required: U256,
        baselines: &dyn DepositStore,
    ) -> Result<(), SweepError> {
        let funding_err = |e: String| SweepError::Funding(e);
        let treasury = self
            .treasury
            .clone()
            .ok_or_else(|| funding_err(format!("no EVM treasury key for {}", self.client.chain)))?;
        let reserved = i128::try_from(shortfall).map_err(|e| funding_err(e.to_string()))?;
        baselines
            .shift_balance_baseline(address_id, reserved)
            .await
            .map_err(|e| funding_err(format!("could not reserve baseline of {:?}: {}", target, e)))?;
        debug!("Funding {:?} with {} wei", target, shortfall);

        let provider = self.client.provider.as_ref();
        let tx = TransactionRequest::new()
            .from(treasury.address())
            .to(target)
            .value(U256::from(shortfall));
        let signer = SignerMiddleware::new(provider.clone(), treasury);
        let pending = match signer.send_transaction(tx, None).await {
            Ok(pending) => pending,
            Err(e) => {
                // never broadcast, the reserved units are not coming
                if let Err(revert) = baselines.shift_balance_baseline(address_id, -reserved).await {
                    error!("Baseline of {:?} stays {} wei too high: {}", target, shortfall, revert);
                }
                return Err(funding_err(e.to_string()));
            }
        };

        let landed = tokio::time::timeout(self.funding_timeout, async {
            let receipt = pending.await.map_err(|e| funding_err(e.to_string()))?;
            confirmed(receipt).map_err(|e| funding_err(e.to_string()))?;
            loop {
                match provider.get_balance(target, None).await {
                    Ok(balance) if balance >= required => break,
                    _ => tokio::time::sleep(Duration::from_millis(FUNDING_POLL_INTERVAL_MS)).await,
                }
            }
            Ok::<(), SweepError>(())
        })
        .await;
        landed.map_err(|_| funding_err(format!("funding of {:?} did not land in time", target)))?
    }
}

#[async_trait]
impl<P: JsonRpcClient + Clone + 'static> ChainSweeper for EvmSweeper<P> {
    fn chain(&self) -> Chain {
        self.client.chain
    }

    async fn sweep(
        &self,
        address: &DepositAddress,
        asset: Asset,
        amount: u128,
        baselines: &dyn DepositStore,
    ) -> Result<SweepOutcome, SweepError> {
        if address.chain != self.client.chain {
            return Err(SweepError::Derivation(format!(
                "{} address handed to the {} sweeper",
                address.chain, self.client.chain
            )));
        }
        let wallet = derive_verified_evm_wallet(&self.seed, address.derivation_index, &address.address)?
            .with_chain_id(self.client.chain_id);
        if asset == self.client.chain.native_asset() {
            self.sweep_native(wallet, amount).await
        } else {
            self.sweep_token(wallet, address.id, asset, amount, baselines).await
        }
    }
}
