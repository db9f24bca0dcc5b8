//! Fakes for the engine tests.

use crate::evm::scanner::native_deposit;
use crate::oracle::PriceOracle;
use crate::storage::DepositStore;
use crate::types::chain::{Asset, Chain};
use crate::types::deposit::{DepositAddress, DiscoveredDeposit};
use crate::types::engine::{ChainScanner, ChainSweeper};
use crate::types::errors::SweepError;
use crate::types::notification::{Notification, Notifier};
use crate::types::scan::ChainScan;
use crate::types::sweep::SweepOutcome;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use ethers::types::U256;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct FixedOracle {
    prices: HashMap<Asset, Decimal>,
}

impl FixedOracle {
    pub fn with_price(asset: Asset, price: Decimal) -> Self {
        Self {
            prices: HashMap::from([(asset, price)]),
        }
    }
}

#[async_trait]
impl PriceOracle for FixedOracle {
    async fn get_asset_price(&self, asset: Asset) -> Result<Decimal> {
        self.prices
            .get(&asset)
            .copied()
            .ok_or_else(|| anyhow!("no price for {}", asset))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(vec![]),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    /// Notifications are detached tasks, give them a chance to run.
    pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
        for _ in 0..100 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} notifications, got {:?}", count, self.sent());
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification);
        if self.fail {
            bail!("chat not found");
        }
        Ok(())
    }
}

pub enum ScanBehavior {
    Found(ChainScan),
    /// Reports this native balance, diffed against the stored baseline at a new block per call.
    NativeBalance(u128),
    Fail(&'static str),
    Hang,
}

pub struct FakeScanner {
    pub chain: Chain,
    pub behavior: ScanBehavior,
    pub calls: Mutex<usize>,
}

impl FakeScanner {
    pub fn new(chain: Chain, behavior: ScanBehavior) -> Self {
        Self {
            chain,
            behavior,
            calls: Mutex::new(0),
        }
    }

    pub fn found(chain: Chain, deposits: Vec<DiscoveredDeposit>, native_balance: Option<&str>) -> Self {
        Self::new(
            chain,
            ScanBehavior::Found(ChainScan {
                deposits,
                native_balance: native_balance.map(str::to_string),
            }),
        )
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ChainScanner for FakeScanner {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn scan(&self, address: &DepositAddress) -> Result<ChainScan> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        match &self.behavior {
            ScanBehavior::Found(scan) => Ok(scan.clone()),
            ScanBehavior::NativeBalance(balance) => {
                let deposit = native_deposit(
                    self.chain,
                    &address.address,
                    address.last_balance.as_deref(),
                    U256::from(*balance),
                    18,
                    100 + call as u64,
                )?;
                Ok(ChainScan {
                    deposits: deposit.into_iter().collect(),
                    native_balance: Some(balance.to_string()),
                })
            }
            ScanBehavior::Fail(error) => bail!("{}", error),
            ScanBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ChainScan::default())
            }
        }
    }
}

/// Records every (address id, asset, amount) it is asked to sweep; failures are keyed by address id.
/// Registered holdings stand in for the on-chain balance, unregistered ones always cover the claim.
pub struct FakeSweeper {
    pub chain: Chain,
    pub failures: HashMap<i32, SweepError>,
    /// Reported by every successful sweep.
    pub native_spent: u128,
    pub holdings: Mutex<HashMap<(i32, Asset), u128>>,
    pub calls: Mutex<Vec<(i32, Asset, u128)>>,
}

impl FakeSweeper {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            failures: HashMap::new(),
            native_spent: 0,
            holdings: Mutex::new(HashMap::new()),
            calls: Mutex::new(vec![]),
        }
    }

    pub fn failing_on(mut self, address_id: i32, error: SweepError) -> Self {
        self.failures.insert(address_id, error);
        self
    }

    pub fn receive(&self, address_id: i32, asset: Asset, amount: u128) {
        *self.holdings.lock().unwrap().entry((address_id, asset)).or_default() += amount;
    }

    pub fn held(&self, address_id: i32, asset: Asset) -> Option<u128> {
        self.holdings.lock().unwrap().get(&(address_id, asset)).copied()
    }

    pub fn calls(&self) -> Vec<(i32, Asset, u128)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainSweeper for FakeSweeper {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn sweep(
        &self,
        address: &DepositAddress,
        asset: Asset,
        amount: u128,
        _baselines: &dyn DepositStore,
    ) -> Result<SweepOutcome, SweepError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((address.id, asset, amount));
        if let Some(error) = self.failures.get(&address.id) {
            return Err(error.clone());
        }
        if let Some(held) = self.holdings.lock().unwrap().get_mut(&(address.id, asset)) {
            if *held == 0 {
                return Err(SweepError::NothingToSweep(address.address.clone()));
            }
            *held -= amount.min(*held);
        }
        Ok(SweepOutcome {
            tx_hash: format!("sweep-{}-{}-{}", address.id, asset, calls.len()),
            native_spent: self.native_spent,
        })
    }
}
