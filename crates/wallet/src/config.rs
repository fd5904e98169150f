//! Wallet service configuration loaded from environment variables.

use std::time::Duration;

/// Largest page a history or review listing will return.
pub const MAX_PAGE_SIZE: usize = 100;

/// Wallet service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `WALLET_WITHDRAW_FEE_BPS`: withdrawal fee in basis points (default: `100`, i.e. 1%)
/// - `WALLET_STEP_TIMEOUT_MS`: deadline for each saga step (default: `5000`)
/// - `WALLET_PAGE_SIZE`: default page size for listings (default: `20`, at most `100`)
/// - `DATABASE_URL`: PostgreSQL connection string (default: unset, in-memory)
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub withdraw_fee_bps: u32,
    pub step_timeout: Duration,
    pub page_size: usize,
    pub database_url: Option<String>,
}

impl WalletConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            withdraw_fee_bps: lookup("WALLET_WITHDRAW_FEE_BPS")
                .and_then(|v| v.parse().ok())
                .filter(|bps| *bps <= 10_000)
                .unwrap_or(defaults.withdraw_fee_bps),
            step_timeout: lookup("WALLET_STEP_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.step_timeout),
            page_size: lookup("WALLET_PAGE_SIZE")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|size| *size > 0)
                .map(|size| size.min(MAX_PAGE_SIZE))
                .unwrap_or(defaults.page_size),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
        }
    }

    pub fn with_withdraw_fee_bps(mut self, bps: u32) -> Self {
        self.withdraw_fee_bps = bps;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Resolves a requested page size against the default and the cap.
    pub fn page_limit(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|l| *l > 0)
            .unwrap_or(self.page_size)
            .min(MAX_PAGE_SIZE)
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            withdraw_fee_bps: 100,
            step_timeout: saga::DEFAULT_STEP_TIMEOUT,
            page_size: 20,
            database_url: None,
        }
    }
}
