use crate::config::constants::{
    BASE_TX_FEE_LAMPORTS, FUNDING_POLL_INTERVAL_MS, NEW_ACCOUNT_THRESHOLD_LAMPORTS, TOKEN_ACCOUNT_RENT_LAMPORTS,
};
use crate::config::settings::ChainConfig;
use crate::services::sweep::{funding_shortfall, native_sweep_amount};
use crate::solana::rpc_pool::RpcClientPool;
use crate::storage::DepositStore;
use crate::types::chain::{Asset, Chain};
use crate::types::deposit::DepositAddress;
use crate::types::engine::ChainSweeper;
use crate::types::errors::SweepError;
use crate::types::keys::HdSeed;
use crate::types::sweep::SweepOutcome;
use crate::utils::decimals::lamports_to_sol;
use crate::utils::keys::derive_verified_solana_keypair;
use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::system_instruction;
use solana_sdk::transaction::Transaction;
use spl_associated_token_account::get_associated_token_address;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Solana deposits are found per signature, so no balance baseline needs adjusting.
const NO_BASELINE: u128 = 0;

fn rpc_err(e: anyhow::Error) -> SweepError {
    SweepError::Rpc(e.to_string())
}

pub struct SolanaSweeper {
    rpc_pool: RpcClientPool,
    seed: HdSeed,
    treasury: Option<Arc<Keypair>>,
    vault: Pubkey,
    mints: HashMap<Asset, (Pubkey, u8)>,
    native_buffer: u64,
    funding_timeout: Duration,
}

impl SolanaSweeper {
    pub fn new(
        rpc_pool: RpcClientPool,
        chain_config: &ChainConfig,
        seed: HdSeed,
        treasury: Option<Arc<Keypair>>,
        funding_timeout: Duration,
    ) -> Result<Self> {
        let vault = Pubkey::from_str(&chain_config.vault_address)
            .with_context(|| format!("Invalid solana vault {}", chain_config.vault_address))?;
        let mints = chain_config
            .tokens
            .iter()
            .map(|t| {
                let mint = Pubkey::from_str(&t.address)
                    .with_context(|| format!("Invalid {} mint {}", t.asset, t.address))?;
                Ok((t.asset, (mint, t.decimals)))
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            rpc_pool,
            seed,
            treasury,
            vault,
            mints,
            native_buffer: chain_config.native_buffer,
            funding_timeout,
        })
    }

    async fn sign_and_send(&self, signer: &Keypair, instructions: &[Instruction]) -> Result<String, SweepError> {
        let blockhash = self.rpc_pool.get_latest_blockhash().await.map_err(rpc_err)?;
        let message = Message::new_with_blockhash(instructions, Some(&signer.pubkey()), &blockhash);
        let tx = Transaction::new(&vec![signer], message, blockhash);
        let signature = self.rpc_pool.send_and_confirm(&tx).await.map_err(rpc_err)?;
        Ok(signature.to_string())
    }

    async fn fee_for(&self, payer: &Pubkey, instructions: &[Instruction]) -> Result<u64, SweepError> {
        let blockhash = self.rpc_pool.get_latest_blockhash().await.map_err(rpc_err)?;
        let message = Message::new_with_blockhash(instructions, Some(payer), &blockhash);
        match self.rpc_pool.get_fee_for_message(&message).await {
            Ok(fee) => Ok(fee),
            Err(e) => {
                warn!("Fee lookup failed, assuming {} lamports per signature: {}", BASE_TX_FEE_LAMPORTS, e);
                Ok(BASE_TX_FEE_LAMPORTS * message.header.num_required_signatures as u64)
            }
        }
    }

    #[instrument(skip(self, owner), fields(owner = %owner.pubkey()))]
    async fn sweep_native(&self, owner: &Keypair, claimed: u128) -> Result<SweepOutcome, SweepError> {
        let pubkey = owner.pubkey();
        let balance = self.rpc_pool.get_balance(&pubkey).await.map_err(rpc_err)?;
        if balance == 0 {
            return Err(SweepError::NothingToSweep(pubkey.to_string()));
        }
        let fee = self
            .fee_for(&pubkey, &[system_instruction::transfer(&pubkey, &self.vault, balance)])
            .await?;
        let amount = native_sweep_amount(balance as u128, fee as u128, self.native_buffer as u128)?.min(claimed);
        let amount = u64::try_from(amount).map_err(|e| SweepError::Rpc(e.to_string()))?;
        let signature = self
            .sign_and_send(owner, &[system_instruction::transfer(&pubkey, &self.vault, amount)])
            .await?;
        info!("Swept {} SOL from {} in {}", lamports_to_sol(amount), pubkey, signature);
        Ok(SweepOutcome {
            tx_hash: signature,
            native_spent: NO_BASELINE,
        })
    }

    #[instrument(skip(self, owner), fields(owner = %owner.pubkey()))]
    async fn sweep_token(&self, owner: &Keypair, asset: Asset, claimed: u128) -> Result<SweepOutcome, SweepError> {
        let (mint, decimals) = self
            .mints
            .get(&asset)
            .copied()
            .ok_or_else(|| SweepError::UnsupportedAsset(asset.to_string()))?;
        let pubkey = owner.pubkey();
        let source = get_associated_token_address(&pubkey, &mint);
        let held = self
            .rpc_pool
            .get_token_account_amount(&source)
            .await
            .map_err(rpc_err)?;
        if held == 0 {
            return Err(SweepError::NothingToSweep(source.to_string()));
        }
        let amount = u64::try_from(claimed).map_or(held, |claimed| claimed.min(held));

        let destination = get_associated_token_address(&self.vault, &mint);
        let needs_vault_account = !self
            .rpc_pool
            .account_exists(&destination)
            .await
            .map_err(rpc_err)?;
        let mut instructions = vec![];
        if needs_vault_account {
            instructions.push(create_associated_token_account_idempotent(
                &pubkey,
                &self.vault,
                &mint,
                &spl_token::id(),
            ));
        }
        instructions.push(
            spl_token::instruction::transfer_checked(
                &spl_token::id(),
                &source,
                &mint,
                &destination,
                &pubkey,
                &[],
                amount,
                decimals,
            )
            .map_err(|e| SweepError::Rpc(e.to_string()))?,
        );

        let fee = self.fee_for(&pubkey, &instructions).await?;
        let rent = if needs_vault_account {
            TOKEN_ACCOUNT_RENT_LAMPORTS
        } else {
            0
        };
        // the owner account has to stay rent exempt after paying
        let required = fee as u128 + rent as u128 + NEW_ACCOUNT_THRESHOLD_LAMPORTS as u128;
        let balance = self.rpc_pool.get_balance(&pubkey).await.map_err(rpc_err)?;
        let shortfall = funding_shortfall(balance as u128, required);
        if shortfall > 0 {
            self.fund(&pubkey, shortfall as u64, required as u64).await?;
        }

        let signature = self.sign_and_send(owner, &instructions).await?;
        info!("Swept {} {} from {} in {}", amount, asset, pubkey, signature);
        Ok(SweepOutcome {
            tx_hash: signature,
            native_spent: NO_BASELINE,
        })
    }

    /// Tops up `target` from the treasury and waits until the balance reaches `required`.
    async fn fund(&self, target: &Pubkey, lamports: u64, required: u64) -> Result<(), SweepError> {
        let treasury = self
            .treasury
            .as_ref()
            .ok_or_else(|| SweepError::Funding("no solana treasury key configured".to_string()))?;
        debug!("Funding {} with {} lamports", target, lamports);
        self.sign_and_send(treasury, &[system_instruction::transfer(&treasury.pubkey(), target, lamports)])
            .await
            .map_err(|e| SweepError::Funding(e.to_string()))?;

        let landed = tokio::time::timeout(self.funding_timeout, async {
            loop {
                match self.rpc_pool.get_balance(target).await {
                    Ok(balance) if balance >= required => return,
                    _ => tokio::time::sleep(Duration::from_millis(FUNDING_POLL_INTERVAL_MS)).await,
                }
            }
        })
        .await;
        landed.map_err(|_| SweepError::Funding(format!("funding of {} did not land in time", target)))
    }
}

#[async_trait]
impl ChainSweeper for SolanaSweeper {
    fn chain(&self) -> Chain {
        Chain::Solana
    }

    async fn sweep(
        &self,
        address: &DepositAddress,
        asset: Asset,
        amount: u128,
        _baselines: &dyn DepositStore,
    ) -> Result<SweepOutcome, SweepError> {
        if address.chain != Chain::Solana {
            return Err(SweepError::Derivation(format!(
                "{} address handed to the solana sweeper",
                address.chain
            )));
        }
        let owner = derive_verified_solana_keypair(&self.seed, address.derivation_index, &address.address)?;
        if asset == Asset::Sol {
            self.sweep_native(&owner, amount).await
        } else {
            self.sweep_token(&owner, asset, amount).await
        }
    }
}
