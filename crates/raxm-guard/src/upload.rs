use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use raxm_protocol::RaxmError;
use sha2::Sha256;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadSignatureError {
    #[error("upload url is missing `{0}`")]
    Missing(&'static str),
    #[error("upload url expired at {expires}")]
    Expired { expires: i64 },
    #[error("upload url signature is invalid")]
    InvalidSignature,
}

impl From<UploadSignatureError> for RaxmError {
    fn from(error: UploadSignatureError) -> Self {
        RaxmError::UploadSignature(error.to_string())
    }
}

/// A signed, expiring upload URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUploadUrl {
    pub path: String,
    /// Unix timestamp (seconds) after which the URL is refused.
    pub expires: i64,
    pub signature: String,
}

impl fmt::Display for SignedUploadUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}?expires={}&signature={}",
            self.path, self.expires, self.signature
        )
    }
}

/// Issues and validates signed upload URLs: `hmac(path?expires=T)`.
#[derive(Clone)]
pub struct UploadUrlSigner {
    key: Vec<u8>,
    ttl: Duration,
}

impl fmt::Debug for UploadUrlSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadUrlSigner")
            .field("key", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl UploadUrlSigner {
    pub fn new(key: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn mac_for(&self, path: &str, expires: i64) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(format!("{path}?expires={expires}").as_bytes());
        Some(mac)
    }

    pub fn sign(&self, path: &str, now: DateTime<Utc>) -> SignedUploadUrl {
        let expires = (now + self.ttl).timestamp();
        let signature = self
            .mac_for(path, expires)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default();
        debug!(path, expires, "upload url signed");
        SignedUploadUrl {
            path: path.to_owned(),
            expires,
            signature,
        }
    }

    /// Accepts only when `now < expires` and the signature matches.
    pub fn verify(
        &self,
        path: &str,
        expires: Option<i64>,
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), UploadSignatureError> {
        let expires = expires.ok_or(UploadSignatureError::Missing("expires"))?;
        let signature = signature.ok_or(UploadSignatureError::Missing("signature"))?;

        if now.timestamp() >= expires {
            warn!(path, expires, "upload url expired");
            return Err(UploadSignatureError::Expired { expires });
        }

        let provided =
            hex::decode(signature).map_err(|_| UploadSignatureError::InvalidSignature)?;
        let mac = self
            .mac_for(path, expires)
            .ok_or(UploadSignatureError::InvalidSignature)?;
        mac.verify_slice(&provided).map_err(|_| {
            warn!(path, expires, "upload url signature rejected");
            UploadSignatureError::InvalidSignature
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UploadUrlSigner {
        UploadUrlSigner::new("app-key", Duration::minutes(5))
    }

    #[test]
    fn signed_url_verifies_before_expiry() {
        let now = Utc::now();
        let url = signer().sign("/raxm/upload-file", now);
        assert_eq!(url.expires, (now + Duration::minutes(5)).timestamp());
        assert!(url.to_string().starts_with("/raxm/upload-file?expires="));
        signer()
            .verify(
                &url.path,
                Some(url.expires),
                Some(&url.signature),
                now + Duration::minutes(4),
            )
            .unwrap();
    }

    #[test]
    fn expired_url_is_refused() {
        let now = Utc::now();
        let url = signer().sign("/raxm/upload-file", now);
        let error = signer()
            .verify(
                &url.path,
                Some(url.expires),
                Some(&url.signature),
                now + Duration::minutes(5),
            )
            .unwrap_err();
        assert_eq!(error, UploadSignatureError::Expired { expires: url.expires });
    }

    #[test]
    fn extended_expiry_or_other_path_is_refused() {
        let now = Utc::now();
        let url = signer().sign("/raxm/upload-file", now);
        let error = signer()
            .verify(&url.path, Some(url.expires + 3600), Some(&url.signature), now)
            .unwrap_err();
        assert_eq!(error, UploadSignatureError::InvalidSignature);

        let error = signer()
            .verify("/admin/upload", Some(url.expires), Some(&url.signature), now)
            .unwrap_err();
        assert_eq!(error, UploadSignatureError::InvalidSignature);
    }

    #[test]
    fn missing_parts_are_reported() {
        let error = signer()
            .verify("/raxm/upload-file", None, Some("ab"), Utc::now())
            .unwrap_err();
        assert_eq!(error, UploadSignatureError::Missing("expires"));
        let raxm: RaxmError = error.into();
        assert_eq!(raxm.class(), raxm_protocol::ErrorClass::UploadSignature);
    }
}
