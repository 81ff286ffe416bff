//! Background balance monitor for self-custodied receiving addresses.
//!
//! Request tasks add addresses with [`AddressMonitor::watch`]; a single
//! polling loop owns removal. The loop runs while at least one address is
//! active and is restarted by the next `watch` after it stops.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::L402Error;
use crate::ledger::{CreditLedger, SettleOutcome};
use crate::payment::{Rail, SettlementEvent};

pub const DEFAULT_SOLANA_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

/// Source of token balances for an owner address.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Balance of `mint` held by `owner`, in token base units.
    async fn token_balance(&self, owner: &str, mint: &str) -> Result<u64, L402Error>;
}

/// Solana JSON-RPC `getTokenAccountsByOwner`.
pub struct SolanaRpc {
    client: reqwest::Client,
    url: String,
}

impl SolanaRpc {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl BalanceSource for SolanaRpc {
    async fn token_balance(&self, owner: &str, mint: &str) -> Result<u64, L402Error> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getTokenAccountsByOwner",
            "params": [owner, { "mint": mint }, { "encoding": "jsonParsed" }],
        });

        let body: serde_json::Value = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| L402Error::provider(Rail::Solana, format!("rpc request failed: {e}")))?
            .json()
            .await
            .map_err(|e| L402Error::provider(Rail::Solana, format!("rpc body: {e}")))?;

        parse_token_accounts(&body)
    }
}

/// Sum `tokenAmount.amount` across every token account in an RPC response.
pub fn parse_token_accounts(body: &serde_json::Value) -> Result<u64, L402Error> {
    if let Some(message) = body["error"]["message"].as_str() {
        return Err(L402Error::provider(Rail::Solana, message));
    }

    let accounts = body["result"]["value"]
        .as_array()
        .ok_or_else(|| L402Error::provider(Rail::Solana, "unexpected rpc response"))?;

    let mut total: u64 = 0;
    for account in accounts {
        let amount = account["account"]["data"]["parsed"]["info"]["tokenAmount"]["amount"]
            .as_str()
            .and_then(|a| a.parse::<u64>().ok())
            .ok_or_else(|| L402Error::provider(Rail::Solana, "token account without amount"))?;
        total = total.saturating_add(amount);
    }
    Ok(total)
}

#[derive(Debug, Clone)]
struct WatchedAddress {
    expected: u64,
    /// Unix timestamp after which the address is dropped unpaid.
    deadline: i64,
}

#[derive(Default)]
struct MonitorState {
    active: HashMap<String, WatchedAddress>,
    running: bool,
}

/// What one polling pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub settled: Vec<String>,
    pub timed_out: Vec<String>,
    /// Addresses whose poll or settlement failed; retried next tick.
    pub errors: usize,
}

pub struct AddressMonitor {
    state: Mutex<MonitorState>,
    source: Arc<dyn BalanceSource>,
    ledger: CreditLedger,
    mint: String,
    interval: Duration,
}

impl AddressMonitor {
    pub fn new(
        source: Arc<dyn BalanceSource>,
        ledger: CreditLedger,
        mint: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
            source,
            ledger,
            mint: mint.into(),
            interval,
        }
    }

    /// Start watching `address` until `deadline` (unix seconds), spawning the
    /// polling loop if it is not running. Must be called inside a tokio runtime.
    pub fn watch(self: &Arc<Self>, address: impl Into<String>, expected: u64, deadline: i64) {
        let address = address.into();
        let mut state = self.lock_state();
        state
            .active
            .insert(address.clone(), WatchedAddress { expected, deadline });
        tracing::info!(address = %address, expected, deadline, "watching address for payment");

        if !state.running {
            state.running = true;
            let monitor = Arc::clone(self);
            tokio::spawn(async move { monitor.run().await });
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock_state().active.len()
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn run(self: Arc<Self>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "address monitor started");
        loop {
            let report = self.tick().await;
            if !report.settled.is_empty() || !report.timed_out.is_empty() {
                tracing::info!(
                    settled = report.settled.len(),
                    timed_out = report.timed_out.len(),
                    errors = report.errors,
                    "address monitor tick"
                );
            }

            {
                let mut state = self.lock_state();
                if state.active.is_empty() {
                    state.running = false;
                    break;
                }
            }

            tokio::time::sleep(self.interval).await;
        }
        tracing::info!("address monitor stopped: no active addresses");
    }

    /// Poll every active address once.
    pub async fn tick(&self) -> TickReport {
        let now = chrono::Utc::now().timestamp();
        let snapshot: Vec<(String, WatchedAddress)> = self
            .lock_state()
            .active
            .iter()
            .map(|(a, w)| (a.clone(), w.clone()))
            .collect();

        let mut report = TickReport::default();
        let mut to_poll = Vec::new();
        for (address, watched) in snapshot {
            if now > watched.deadline {
                report.timed_out.push(address);
            } else {
                to_poll.push((address, watched));
            }
        }

        let balances = futures::future::join_all(
            to_poll
                .iter()
                .map(|(address, _)| self.source.token_balance(address, &self.mint)),
        )
        .await;

        for ((address, watched), balance) in to_poll.into_iter().zip(balances) {
            match balance {
                Ok(balance) if balance >= watched.expected => {
                    if self.settle(&address, balance) {
                        report.settled.push(address);
                    } else {
                        report.errors += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(address = %address, error = %e, "balance poll failed");
                }
            }
        }

        for address in &report.timed_out {
            tracing::warn!(address = %address, "payment window elapsed without full payment");
            if let Err(e) = self.ledger.store().mark_expired(address) {
                tracing::error!(address = %address, error = %e, "failed to mark request expired");
            }
        }

        let mut state = self.lock_state();
        for address in report.settled.iter().chain(report.timed_out.iter()) {
            state.active.remove(address);
        }
        report
    }

    /// Returns `true` when the address is finished with, whether or not this
    /// call granted the credits.
    fn settle(&self, address: &str, balance: u64) -> bool {
        // USDC has 6 decimals; the payment record keeps cents.
        let observed_cents = i64::try_from(balance / 10_000).unwrap_or(i64::MAX);
        let event = SettlementEvent::new(address).with_amount(observed_cents, "USDC");

        match self.ledger.settle(&event) {
            Ok(SettleOutcome::AmountMismatch { .. }) => false,
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    address = %address,
                    balance,
                    error = %e,
                    "settlement failed for funded address; will retry"
                );
                false
            }
        }
    }
}
