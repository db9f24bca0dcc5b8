use crate::config::constants::SOL_DECIMALS;
use crate::types::chain::Asset;
use anyhow::{anyhow, Result};
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiMessage,
    UiTransactionTokenBalance,
};
use std::collections::{BTreeMap, HashMap};

/// SPL mint -> (asset, decimals)
pub type MintTable = HashMap<String, (Asset, u8)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    pub account_index: u8,
    pub mint: String,
    pub owner: Option<String>,
    pub amount: u128,
}

/// The balance-relevant part of a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxBalances {
    pub slot: u64,
    pub failed: bool,
    pub account_keys: Vec<String>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub pre_token_balances: Vec<TokenBalance>,
    pub post_token_balances: Vec<TokenBalance>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceIncrease {
    pub asset: Asset,
    pub amount: u128,
    pub decimals: u8,
}

pub fn deserialize<T: Clone>(item: &OptionSerializer<T>) -> Option<T> {
    match item {
        OptionSerializer::Some(val) => Some(val.clone()),
        _ => None,
    }
}

fn token_balances(balances: &OptionSerializer<Vec<UiTransactionTokenBalance>>) -> Result<Vec<TokenBalance>> {
    deserialize(balances)
        .unwrap_or_default()
        .into_iter()
        .map(|b| {
            Ok(TokenBalance {
                account_index: b.account_index,
                amount: b.ui_token_amount.amount.parse::<u128>()?,
                owner: deserialize(&b.owner),
                mint: b.mint,
            })
        })
        .collect()
}

impl TryFrom<&EncodedConfirmedTransactionWithStatusMeta> for TxBalances {
    type Error = anyhow::Error;

    fn try_from(tx: &EncodedConfirmedTransactionWithStatusMeta) -> Result<Self> {
        let meta = tx
            .transaction
            .meta
            .as_ref()
            .ok_or_else(|| anyhow!("Transaction has no status meta"))?;
        let account_keys = match &tx.transaction.transaction {
            EncodedTransaction::Json(ui_tx) => match &ui_tx.message {
                UiMessage::Parsed(message) => message
                    .account_keys
                    .iter()
                    .map(|k| k.pubkey.clone())
                    .collect(),
                UiMessage::Raw(message) => {
                    let mut keys = message.account_keys.clone();
                    // v0 transactions append lookup-table accounts after the static keys
                    if let Some(loaded) = deserialize(&meta.loaded_addresses) {
                        keys.extend(loaded.writable);
                        keys.extend(loaded.readonly);
                    }
                    keys
                }
            },
            _ => return Err(anyhow!("Transaction was not returned in json encoding")),
        };
        Ok(Self {
            slot: tx.slot,
            failed: meta.err.is_some(),
            account_keys,
            pre_balances: meta.pre_balances.clone(),
            post_balances: meta.post_balances.clone(),
            pre_token_balances: token_balances(&meta.pre_token_balances)?,
            post_token_balances: token_balances(&meta.post_token_balances)?,
        })
    }
}

/// Everything `owner` gained in the transaction: lamports on the owner account itself and
/// tokens on accounts it owns, for known mints only. Native first, then by asset.
pub fn incoming_balance_changes(tx: &TxBalances, owner: &str, mints: &MintTable) -> Vec<BalanceIncrease> {
    let mut increases = vec![];
    if tx.failed {
        return increases;
    }

    if let Some(index) = tx.account_keys.iter().position(|k| k == owner) {
        let pre = tx.pre_balances.get(index).copied().unwrap_or(0);
        let post = tx.post_balances.get(index).copied().unwrap_or(0);
        if post > pre {
            increases.push(BalanceIncrease {
                asset: Asset::Sol,
                amount: (post - pre) as u128,
                decimals: SOL_DECIMALS,
            });
        }
    }

    let mut per_asset: BTreeMap<Asset, (i128, u8)> = BTreeMap::new();
    for post in tx
        .post_token_balances
        .iter()
        .filter(|b| b.owner.as_deref() == Some(owner))
    {
        let Some((asset, decimals)) = mints.get(&post.mint) else {
            continue;
        };
        let pre = tx
            .pre_token_balances
            .iter()
            .find(|b| b.account_index == post.account_index && b.mint == post.mint)
            .map(|b| b.amount)
            .unwrap_or(0);
        let entry = per_asset.entry(*asset).or_insert((0, *decimals));
        entry.0 += post.amount as i128 - pre as i128;
    }
    // a token account closed in the same transaction only shows up in the pre balances
    for pre in tx
        .pre_token_balances
        .iter()
        .filter(|b| b.owner.as_deref() == Some(owner))
    {
        let Some((asset, decimals)) = mints.get(&pre.mint) else {
            continue;
        };
        let still_open = tx
            .post_token_balances
            .iter()
            .any(|b| b.account_index == pre.account_index && b.mint == pre.mint);
        if !still_open {
            let entry = per_asset.entry(*asset).or_insert((0, *decimals));
            entry.0 -= pre.amount as i128;
        }
    }

    increases.extend(
        per_asset
            .into_iter()
            .filter(|(_, (delta, _))| *delta > 0)
            .map(|(asset, (delta, decimals))| BalanceIncrease {
                asset,
                amount: delta as u128,
                decimals,
            }),
    );
    increases
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    const OWNER: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
    const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    fn mints() -> MintTable {
        hashmap! { USDC_MINT.to_string() => (Asset::Usdc, 6) }
    }

    fn token(index: u8, mint: &str, owner: &str, amount: u128) -> TokenBalance {
        TokenBalance {
            account_index: index,
            mint: mint.to_string(),
            owner: Some(owner.to_string()),
            amount,
        }
    }

    fn tx() -> TxBalances {
        TxBalances {
            slot: 250_000_000,
            failed: false,
            account_keys: vec!["Sender111".to_string(), OWNER.to_string(), "Ata111".to_string()],
            pre_balances: vec![5_000_000_000, 1_000_000, 2_039_280],
            post_balances: vec![3_999_995_000, 1_001_000_000, 2_039_280],
            pre_token_balances: vec![],
            post_token_balances: vec![],
        }
    }

    #[test]
    fn test_native_increase() {
        let changes = incoming_balance_changes(&tx(), OWNER, &mints());
        assert_eq!(
            changes,
            vec![BalanceIncrease {
                asset: Asset::Sol,
                amount: 1_000_000_000,
                decimals: 9
            }]
        );
    }

    #[test]
    fn test_native_decrease_is_ignored() {
        let changes = incoming_balance_changes(&tx(), "Sender111", &mints());
        assert!(changes.is_empty());
    }

    #[test]
    fn test_token_increase_on_owned_account() {
        let mut tx = tx();
        tx.post_balances = tx.pre_balances.clone();
        tx.pre_token_balances = vec![token(2, USDC_MINT, OWNER, 1_000_000)];
        tx.post_token_balances = vec![token(2, USDC_MINT, OWNER, 26_000_000)];
        let changes = incoming_balance_changes(&tx, OWNER, &mints());
        assert_eq!(
            changes,
            vec![BalanceIncrease {
                asset: Asset::Usdc,
                amount: 25_000_000,
                decimals: 6
            }]
        );
    }

    #[test]
    fn test_new_token_account_counts_from_zero() {
        let mut tx = tx();
        tx.post_balances = tx.pre_balances.clone();
        tx.post_token_balances = vec![token(2, USDC_MINT, OWNER, 7_500_000)];
        let changes = incoming_balance_changes(&tx, OWNER, &mints());
        assert_eq!(changes[0].amount, 7_500_000);
    }

    #[test]
    fn test_unknown_mint_and_foreign_owner_are_discarded() {
        let mut tx = tx();
        tx.post_balances = tx.pre_balances.clone();
        tx.post_token_balances = vec![
            token(2, "So11111111111111111111111111111111111111112", OWNER, 9),
            token(0, USDC_MINT, "Sender111", 9),
        ];
        assert!(incoming_balance_changes(&tx, OWNER, &mints()).is_empty());
    }

    #[test]
    fn test_failed_transaction_yields_nothing() {
        let mut tx = tx();
        tx.failed = true;
        assert!(incoming_balance_changes(&tx, OWNER, &mints()).is_empty());
    }
}
