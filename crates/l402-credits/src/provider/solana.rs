use async_trait::async_trait;
use base64::Engine;
use ed25519_dalek::SigningKey;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::{ChargeProvider, ChargeRequest, CreatedCharge};
use crate::error::L402Error;
use crate::hmac::compute_hmac_raw;
use crate::monitor::AddressMonitor;
use crate::payment::{ChargeDescriptor, PaymentRequest, Rail};
use crate::store::LedgerStore;

pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
/// USDC base units per US cent (6 decimals).
pub const USDC_UNITS_PER_CENT: u64 = 10_000;
/// Counter in the ledger store that hands out derivation indices.
pub const DERIVATION_COUNTER: &str = "solana_address_index";

#[derive(Serialize, Deserialize)]
struct MasterKeyFile {
    /// Base64 of the 32-byte master secret.
    secret_key: String,
    /// Base58 public key of the master secret, for operator reference.
    public_key: String,
}

/// Master secret from which receiving addresses are derived.
pub struct MasterKey {
    secret: [u8; 32],
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl MasterKey {
    pub fn from_bytes(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    /// Load the master key file, creating it with a fresh random secret if it
    /// does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self, L402Error> {
        if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                L402Error::Config(format!("cannot read master key {}: {e}", path.display()))
            })?;
            let file: MasterKeyFile = serde_json::from_str(&raw)?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(file.secret_key.trim())
                .map_err(|e| L402Error::Config(format!("master key is not base64: {e}")))?;
            let secret: [u8; 32] = bytes
                .try_into()
                .map_err(|_| L402Error::Config("master key must be 32 bytes".to_string()))?;
            tracing::info!(path = %path.display(), "loaded Solana master key");
            return Ok(Self { secret });
        }

        let secret: [u8; 32] = rand::rng().random();
        let key = Self { secret };
        let file = MasterKeyFile {
            secret_key: base64::engine::general_purpose::STANDARD.encode(secret),
            public_key: key.public_key(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?).map_err(|e| {
            L402Error::Config(format!("cannot write master key {}: {e}", path.display()))
        })?;
        tracing::warn!(path = %path.display(), "generated new Solana master key; back it up");
        Ok(key)
    }

    pub fn public_key(&self) -> String {
        let signing = SigningKey::from_bytes(&self.secret);
        bs58::encode(signing.verifying_key().as_bytes()).into_string()
    }

    /// Receiving address for `index`: the ed25519 public key of the seed
    /// HMAC-SHA256(master, index), base58-encoded.
    pub fn derive_address(&self, index: u64) -> String {
        let seed = compute_hmac_raw(&self.secret, &index.to_be_bytes());
        let signing = SigningKey::from_bytes(&seed);
        bs58::encode(signing.verifying_key().as_bytes()).into_string()
    }
}

/// Fresh USDC receiving address per payment request, settled by the
/// [`AddressMonitor`] rather than by webhook.
pub struct SolanaAddresses {
    master: MasterKey,
    store: Arc<dyn LedgerStore>,
    monitor: Arc<AddressMonitor>,
    mint: String,
    payment_timeout_secs: i64,
}

impl SolanaAddresses {
    pub fn new(
        master: MasterKey,
        store: Arc<dyn LedgerStore>,
        monitor: Arc<AddressMonitor>,
        mint: impl Into<String>,
        payment_timeout_secs: i64,
    ) -> Self {
        Self {
            master,
            store,
            monitor,
            mint: mint.into(),
            payment_timeout_secs,
        }
    }

    /// Put every unexpired pending Solana request back under watch.
    ///
    /// The monitor's watch set lives in memory, so this runs once at startup
    /// to keep polling addresses created before a restart. Must be called
    /// inside a tokio runtime.
    pub fn resume_pending(&self, now: i64) -> Result<usize, L402Error> {
        let pending = self.store.pending_requests(Rail::Solana, now)?;
        for request in &pending {
            self.activate(request);
        }
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "resumed watching pending Solana addresses");
        }
        Ok(pending.len())
    }
}

fn expected_base_units(cents: i64) -> u64 {
    u64::try_from(cents).unwrap_or(0) * USDC_UNITS_PER_CENT
}

#[async_trait]
impl ChargeProvider for SolanaAddresses {
    fn rail(&self) -> Rail {
        Rail::Solana
    }

    fn min_hold_secs(&self) -> i64 {
        self.payment_timeout_secs
    }

    async fn create_charge(&self, charge: &ChargeRequest<'_>) -> Result<CreatedCharge, L402Error> {
        let index = self.store.next_index(DERIVATION_COUNTER)?;
        let address = self.master.derive_address(index);

        tracing::info!(
            address = %address,
            index,
            user_id = %charge.user_id,
            "derived Solana receiving address"
        );

        Ok(CreatedCharge {
            correlation_id: address.clone(),
            descriptor: ChargeDescriptor::Solana {
                address,
                mint: self.mint.clone(),
                amount: expected_base_units(charge.offer.amount),
            },
        })
    }

    fn activate(&self, request: &PaymentRequest) {
        self.monitor.watch(
            request.id.clone(),
            expected_base_units(request.amount),
            request.expires_at,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic_and_index_distinct() {
        let key = MasterKey::from_bytes([7u8; 32]);
        let a0 = key.derive_address(0);
        assert_eq!(a0, key.derive_address(0));
        assert_ne!(a0, key.derive_address(1));
        assert_ne!(a0, key.public_key());

        let decoded = bs58::decode(&a0).into_vec().unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn test_master_key_created_then_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master_key.json");

        let created = MasterKey::load_or_create(&path).unwrap();
        assert!(path.exists());
        let reloaded = MasterKey::load_or_create(&path).unwrap();
        assert_eq!(created.derive_address(42), reloaded.derive_address(42));
    }

    #[test]
    fn test_corrupt_master_key_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master_key.json");
        std::fs::write(&path, r#"{"secret_key":"c2hvcnQ=","public_key":"x"}"#).unwrap();
        assert!(matches!(
            MasterKey::load_or_create(&path),
            Err(L402Error::Config(_))
        ));
    }

    #[test]
    fn test_expected_base_units() {
        assert_eq!(expected_base_units(99), 990_000);
        assert_eq!(expected_base_units(1), 10_000);
    }
}
