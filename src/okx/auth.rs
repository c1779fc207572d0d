//! OKX request signing
//!
//! OKX v5 authenticates every private request with
//! `Base64(HMAC-SHA256(timestamp + method + requestPath + body))` using the
//! API secret as the key, alongside the key id and account passphrase
//! headers. Timestamps are ISO-8601 with millisecond precision.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// API credentials for the OKX account
#[derive(Debug, Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
    passphrase: String,
}

impl Credentials {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Credentials {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: passphrase.into(),
        }
    }

    /// Load credentials from the environment
    ///
    /// Real trading reads `OKX_API_KEY` / `OKX_API_SECRET` /
    /// `OKX_API_PASSPHRASE`; sandbox mode reads the `OKX_SIM_*`
    /// equivalents for the demo-trading account.
    pub fn from_env(sandbox: bool) -> Result<Self> {
        let prefix = if sandbox { "OKX_SIM" } else { "OKX" };
        let var = |suffix: &str| {
            let name = format!("{}_{}", prefix, suffix);
            std::env::var(&name).context(format!("Missing environment variable {}", name))
        };

        Ok(Credentials {
            api_key: var("API_KEY")?,
            api_secret: var("API_SECRET")?,
            passphrase: var("API_PASSPHRASE")?,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// Sign a request with this credential's secret
    pub fn sign(&self, timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
        sign_request(&self.api_secret, timestamp, method, request_path, body)
    }
}

/// Produce the OK-ACCESS-SIGN header value
pub fn sign_request(
    secret: &str,
    timestamp: &str,
    method: &str,
    request_path: &str,
    body: &str,
) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(method.as_bytes());
    mac.update(request_path.as_bytes());
    mac.update(body.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Render a timestamp the way OKX expects: `2020-12-08T09:08:57.715Z`
pub fn iso_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_has_millisecond_precision_and_z_suffix() {
        let dt = Utc.with_ymd_and_hms(2020, 12, 8, 9, 8, 57).unwrap()
            + chrono::Duration::milliseconds(715);
        assert_eq!(iso_timestamp(dt), "2020-12-08T09:08:57.715Z");
    }

    #[test]
    fn signature_is_stable_for_fixed_inputs() {
        let sig = sign_request(
            "secret",
            "2020-12-08T09:08:57.715Z",
            "GET",
            "/api/v5/account/balance?ccy=USDT",
            "",
        );
        // Base64 HMAC-SHA256 is 44 characters with padding
        assert_eq!(sig.len(), 44);
        assert!(sig.ends_with('='));

        let again = sign_request(
            "secret",
            "2020-12-08T09:08:57.715Z",
            "GET",
            "/api/v5/account/balance?ccy=USDT",
            "",
        );
        assert_eq!(sig, again);
    }

    #[test]
    fn signature_covers_every_component() {
        let base = sign_request("secret", "t", "GET", "/path", "");
        assert_ne!(base, sign_request("secret2", "t", "GET", "/path", ""));
        assert_ne!(base, sign_request("secret", "t2", "GET", "/path", ""));
        assert_ne!(base, sign_request("secret", "t", "POST", "/path", ""));
        assert_ne!(base, sign_request("secret", "t", "GET", "/other", ""));
        assert_ne!(base, sign_request("secret", "t", "GET", "/path", "{}"));
    }
}
