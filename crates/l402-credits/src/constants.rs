/// Shortest time a charge stays payable, whatever the rail.
pub const DEFAULT_MIN_CHARGE_HOLD_SECS: i64 = 30 * 60;

/// BTC/USD rate cache lifetime.
pub const DEFAULT_PRICE_CACHE_TTL_SECS: u64 = 600;

/// Lifetime of the context token handed out with a challenge.
pub const DEFAULT_CONTEXT_TOKEN_TTL_SECS: i64 = 600;

/// Interval between balance polls of watched Solana addresses.
pub const DEFAULT_SOLANA_POLL_INTERVAL_SECS: u64 = 10;

/// How long a derived Solana address is watched before it is given up.
pub const DEFAULT_SOLANA_PAYMENT_TIMEOUT_SECS: i64 = 30 * 60;

/// Interval of the pending→expired sweep.
pub const DEFAULT_EXPIRY_SWEEP_INTERVAL_SECS: u64 = 60;

/// Added on top of a charge's minimum hold so a provider that measures the
/// hold from its own clock still sees the floor met.
pub const CHARGE_HOLD_MARGIN_SECS: i64 = 60;
