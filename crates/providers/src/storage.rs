//! Time-limited read links for documents in Azure Blob Storage.
//!
//! Citations point at blobs in a private container, so each source path
//! gets an account SAS appended before it is handed to the caller.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sourcechat_core::error::Error;
use sourcechat_core::retrieval::SourceLinker;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Storage service version the signature is computed for.
pub const SAS_VERSION: &str = "2021-08-06";

const PERMISSIONS: &str = "rwlacu";
const SERVICES: &str = "b";
const RESOURCE_TYPES: &str = "sco";
const PROTOCOL: &str = "https";

/// Signs source paths with an account-level shared access signature.
#[derive(Clone)]
pub struct BlobSasSigner {
    account_name: String,
    mac: HmacSha256,
    lifetime: Duration,
}

impl std::fmt::Debug for BlobSasSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobSasSigner")
            .field("account_name", &self.account_name)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl BlobSasSigner {
    /// `account_key` is the base64 key from the storage account. A key that
    /// does not decode is rejected here so signing itself cannot fail.
    pub fn new(
        account_name: impl Into<String>,
        account_key: &str,
        lifetime: Duration,
    ) -> Result<Self, Error> {
        let key = STANDARD.decode(account_key.trim()).map_err(|e| Error::Config {
            message: format!("storage account key is not valid base64: {e}"),
        })?;
        let mac = HmacSha256::new_from_slice(&key).map_err(|e| Error::Config {
            message: format!("storage account key rejected: {e}"),
        })?;

        Ok(Self {
            account_name: account_name.into(),
            mac,
            lifetime,
        })
    }

    /// Build from the `[storage]` config section. `None` when no account is
    /// configured, in which case source paths are passed through unsigned.
    pub fn from_config(config: &sourcechat_config::StorageConfig) -> Result<Option<Self>, Error> {
        match (&config.account_name, &config.account_key) {
            (Some(name), Some(key)) => Ok(Some(Self::new(
                name.clone(),
                key,
                Duration::minutes(config.sas_lifetime_minutes),
            )?)),
            (None, None) => Ok(None),
            _ => Err(Error::Config {
                message: "storage.account_name and storage.account_key must be set together"
                    .into(),
            }),
        }
    }

    /// SAS query string valid until `now + lifetime`.
    pub fn token_at(&self, now: DateTime<Utc>) -> String {
        let expiry = (now + self.lifetime).format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let string_to_sign = format!(
            "{account}\n{PERMISSIONS}\n{SERVICES}\n{RESOURCE_TYPES}\n\n{expiry}\n\n{PROTOCOL}\n{SAS_VERSION}\n\n",
            account = self.account_name,
        );

        let mut mac = self.mac.clone();
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        format!(
            "sv={SAS_VERSION}&ss={SERVICES}&srt={RESOURCE_TYPES}&sp={PERMISSIONS}&se={}&spr={PROTOCOL}&sig={}",
            urlencoding::encode(&expiry),
            urlencoding::encode(&signature)
        )
    }

    pub fn link_at(&self, source_file: &str, now: DateTime<Utc>) -> String {
        format!("{source_file}?{}", self.token_at(now))
    }
}

impl SourceLinker for BlobSasSigner {
    fn link(&self, source_file: &str) -> String {
        debug!(account = %self.account_name, "Signing source link");
        self.link_at(source_file, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signer() -> BlobSasSigner {
        // base64("secret-key-for-tests")
        BlobSasSigner::new("myaccount", "c2VjcmV0LWtleS1mb3ItdGVzdHM=", Duration::minutes(60))
            .unwrap()
    }

    #[test]
    fn signature_matches_known_vector() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let token = signer().token_at(now);
        assert_eq!(
            token,
            "sv=2021-08-06&ss=b&srt=sco&sp=rwlacu&se=2024-03-01T13%3A00%3A00Z&spr=https\
             &sig=T4aY7u%2FqSNNOtz1HTpnjXdRQKkm43OtzZLWpqFFwf9g%3D"
        );
    }

    #[test]
    fn link_appends_token_to_path() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let link = signer().link_at("https://myaccount.blob.core.windows.net/upload/a.pdf", now);
        assert!(link.starts_with("https://myaccount.blob.core.windows.net/upload/a.pdf?sv="));
    }

    #[test]
    fn bad_key_is_rejected_up_front() {
        let err = BlobSasSigner::new("acct", "not base64!!", Duration::minutes(60)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn half_configured_account_is_an_error() {
        let config = sourcechat_config::StorageConfig {
            account_name: Some("acct".into()),
            account_key: None,
            sas_lifetime_minutes: 60,
        };
        assert!(BlobSasSigner::from_config(&config).is_err());

        let empty = sourcechat_config::StorageConfig {
            account_name: None,
            account_key: None,
            sas_lifetime_minutes: 60,
        };
        assert!(BlobSasSigner::from_config(&empty).unwrap().is_none());
    }

    #[test]
    fn debug_hides_key() {
        let out = format!("{:?}", signer());
        assert!(out.contains("myaccount"));
        assert!(!out.contains("c2VjcmV0"));
    }
}
