use anyhow::Context;

use order_client_instrumented::prelude::MerchantCredentials;

pub const MERCHANT_ID_ENV: &str = "MERCHANT_ID";
pub const CHANNEL_ID_ENV: &str = "CHANNEL_ID";
pub const MERCHANT_KEY_ENV: &str = "MERCHANT_KEY";

/// Merchant settings used when the environment does not provide them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderApiDefaults {
    pub merchant_id: i64,
    pub channel_id: i64,
    pub merchant_key: &'static str,
}

impl Default for OrderApiDefaults {
    fn default() -> Self {
        Self {
            merchant_id: 1,
            channel_id: 1,
            merchant_key: "your_merchant_key",
        }
    }
}

impl OrderApiDefaults {
    /// The merchant and channel seeded for local smoke testing.
    pub fn smoke_test() -> Self {
        Self {
            merchant_id: 20001,
            channel_id: 8008,
            ..Self::default()
        }
    }
}

/// Read the merchant credentials from `MERCHANT_ID`, `CHANNEL_ID` and `MERCHANT_KEY`.
pub fn merchant_credentials_from_env(
    defaults: OrderApiDefaults,
) -> anyhow::Result<MerchantCredentials> {
    merchant_credentials(|key| std::env::var(key).ok(), defaults)
}

pub(crate) fn merchant_credentials(
    lookup: impl Fn(&str) -> Option<String>,
    defaults: OrderApiDefaults,
) -> anyhow::Result<MerchantCredentials> {
    let read_id = |key: &str, default: i64| -> anyhow::Result<i64> {
        match lookup(key) {
            Some(value) => value
                .trim()
                .parse()
                .with_context(|| format!("{key} must be an integer, got {value:?}")),
            None => Ok(default),
        }
    };

    let credentials = MerchantCredentials {
        merchant_id: read_id(MERCHANT_ID_ENV, defaults.merchant_id)?,
        channel_id: read_id(CHANNEL_ID_ENV, defaults.channel_id)?,
        key: lookup(MERCHANT_KEY_ENV).unwrap_or_else(|| defaults.merchant_key.to_string()),
    };

    if credentials.key == OrderApiDefaults::default().merchant_key {
        log::warn!(
            "Using the placeholder merchant key, the service will reject signatures unless it is configured with the same key. Set {MERCHANT_KEY_ENV} to the merchant's signing key."
        );
    }

    Ok(credentials)
}
