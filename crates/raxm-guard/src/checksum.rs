use hmac::{Hmac, Mac};
use raxm_protocol::{Fingerprint, RaxmError, RaxmResult, ServerMemo, WireCodec};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over the canonical `{fingerprint, memo}` bytes.
#[derive(Clone)]
pub struct ChecksumGuard {
    key: Vec<u8>,
}

impl std::fmt::Debug for ChecksumGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChecksumGuard")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl ChecksumGuard {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    fn mac(&self) -> Option<HmacSha256> {
        HmacSha256::new_from_slice(&self.key).ok()
    }

    /// Hex checksum of the pair; `children` and `checksum` are not covered.
    pub fn generate(&self, fingerprint: &Fingerprint, memo: &ServerMemo) -> RaxmResult<String> {
        let bytes = WireCodec::canonical_bytes(fingerprint, memo)?;
        let mut mac = self
            .mac()
            .ok_or_else(|| RaxmError::Serialization("invalid checksum key".to_owned()))?;
        mac.update(&bytes);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time verification. Malformed hex or an unencodable memo
    /// never verifies.
    pub fn verify(&self, checksum: &str, fingerprint: &Fingerprint, memo: &ServerMemo) -> bool {
        let Ok(expected) = hex::decode(checksum) else {
            return false;
        };
        let Ok(bytes) = WireCodec::canonical_bytes(fingerprint, memo) else {
            return false;
        };
        let Some(mut mac) = self.mac() else {
            return false;
        };
        mac.update(&bytes);
        mac.verify_slice(&expected).is_ok()
    }

    /// Verify the checksum carried inside `memo` itself.
    pub fn ensure_valid(&self, fingerprint: &Fingerprint, memo: &ServerMemo) -> RaxmResult<()> {
        if self.verify(&memo.checksum, fingerprint, memo) {
            return Ok(());
        }
        warn!(
            component = %fingerprint.name,
            component_id = %fingerprint.id,
            "server memo checksum rejected"
        );
        Err(RaxmError::ChecksumMismatch {
            component: fingerprint.name.clone(),
        })
    }
}
