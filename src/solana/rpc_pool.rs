use crate::config::settings::{ProviderName, Rpc};
use crate::solana::AccountError;
use anyhow::{bail, Error, Result};
use config::Map;
use solana_client::client_error::ClientErrorKind::TransactionError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_client::rpc_response::RpcConfirmedTransactionStatusWithSignature;
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::hash::Hash;
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use solana_transaction_status::{EncodedConfirmedTransactionWithStatusMeta, UiTransactionEncoding};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Default, Clone)]
pub struct RpcClientPool {
    pub(crate) clients: Map<ProviderName, Arc<RpcClient>>,
}

impl Debug for RpcClientPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClientPool")
            .field("clients", &self.clients.keys())
            .finish()
    }
}

fn is_account_not_found(message: &str) -> bool {
    message.contains("AccountNotFound")
        || message.contains("Account not found")
        || message.contains("could not find account")
}

impl RpcClientPool {
    #[tracing::instrument]
    pub fn new(rpc_client_uris: &Map<ProviderName, Rpc>, commitment: CommitmentLevel) -> Self {
        Self {
            clients: rpc_client_uris
                .iter()
                .map(|(provider_name, rpc)| {
                    (
                        provider_name.to_owned(),
                        Arc::new(RpcClient::new_with_commitment(
                            rpc.uri.to_string(),
                            CommitmentConfig { commitment },
                        )),
                    )
                })
                .collect(),
        }
    }

    /// Tries every provider in turn, a missing account short-circuits since other providers will agree.
    pub async fn execute_rpc_method_consequently_till_first_success<F, Fut, T, E>(
        &self,
        method: F,
    ) -> Result<T>
    where
        F: Fn(Arc<RpcClient>) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
        T: Send + 'static,
        E: Into<Error> + std::fmt::Display + Send + 'static,
    {
        let mut last_error = None;
        for (provider_name, client) in &self.clients {
            match method(client.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    trace!("Error executing method on {}: {}", provider_name, e);
                    if is_account_not_found(&e.to_string()) {
                        bail!(AccountError::AccountNotFound)
                    }
                    last_error = Some(e.to_string());
                }
            }
        }
        bail!(
            "Failed to execute method on all providers: {}",
            last_error.unwrap_or_else(|| "no providers configured".to_string())
        )
    }

    pub async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64> {
        let pubkey = Arc::new(*pubkey);
        self.execute_rpc_method_consequently_till_first_success(move |client| {
            let pubkey = Arc::clone(&pubkey);
            async move { client.get_balance(&pubkey).await }
        })
        .await
    }

    /// Raw token amount of a token account, zero when the account was never created.
    pub async fn get_token_account_amount(&self, token_account: &Pubkey) -> Result<u64> {
        let pubkey = Arc::new(*token_account);
        let balance = self
            .execute_rpc_method_consequently_till_first_success(move |client| {
                let pubkey = Arc::clone(&pubkey);
                async move { client.get_token_account_balance(&pubkey).await }
            })
            .await;
        match balance {
            Ok(balance) => Ok(balance.amount.parse::<u64>()?),
            Err(e) if is_account_not_found(&e.to_string()) => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub async fn account_exists(&self, pubkey: &Pubkey) -> Result<bool> {
        trace!("Checking if account exists: {:?}", pubkey);
        let pubkey = Arc::new(*pubkey);
        self.execute_rpc_method_consequently_till_first_success(move |client| {
            let pubkey = Arc::clone(&pubkey);
            async move {
                match client.get_account(&pubkey).await {
                    Ok(_) => Ok(true),
                    Err(e) => match e.kind {
                        TransactionError(solana_sdk::transaction::TransactionError::AccountNotFound) => {
                            Ok(false)
                        }
                        _ if is_account_not_found(&e.to_string()) => Ok(false),
                        _ => Err(e),
                    },
                }
            }
        })
        .await
    }

    pub async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>> {
        let address = Arc::new(*address);
        self.execute_rpc_method_consequently_till_first_success(move |client| {
            let address = Arc::clone(&address);
            async move {
                client
                    .get_signatures_for_address_with_config(
                        &address,
                        GetConfirmedSignaturesForAddress2Config {
                            limit: Some(limit),
                            commitment: Some(CommitmentConfig::confirmed()),
                            ..Default::default()
                        },
                    )
                    .await
            }
        })
        .await
    }

    // Note! get_transaction doesn't support commitment level below confirmed!
    pub async fn get_transaction(
        &self,
        signature: &Signature,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta> {
        let signature = *signature;
        self.execute_rpc_method_consequently_till_first_success(move |client| async move {
            client
                .get_transaction_with_config(
                    &signature,
                    RpcTransactionConfig {
                        encoding: Some(UiTransactionEncoding::JsonParsed),
                        commitment: Some(CommitmentConfig::confirmed()),
                        max_supported_transaction_version: Some(0),
                    },
                )
                .await
        })
        .await
    }

    pub async fn get_latest_blockhash(&self) -> Result<Hash> {
        self.execute_rpc_method_consequently_till_first_success(move |client| async move {
            client.get_latest_blockhash().await
        })
        .await
    }

    /// Exact fee the cluster charges for `message`, blockhash included.
    pub async fn get_fee_for_message(&self, message: &Message) -> Result<u64> {
        let message = Arc::new(message.clone());
        self.execute_rpc_method_consequently_till_first_success(move |client| {
            let message = Arc::clone(&message);
            async move { client.get_fee_for_message(message.as_ref()).await }
        })
        .await
    }

    /// Sends through the first provider that accepts the transaction and waits for confirmation.
    pub async fn send_and_confirm(&self, tx: &Transaction) -> Result<Signature> {
        let tx = Arc::new(tx.clone());
        let signature = self
            .execute_rpc_method_consequently_till_first_success(move |client| {
                let tx = Arc::clone(&tx);
                async move { client.send_and_confirm_transaction(tx.as_ref()).await }
            })
            .await?;
        debug!("Transaction confirmed: {}", signature);
        Ok(signature)
    }
}
