//! Integrity guards.
//!
//! - [`ChecksumGuard`] signs and verifies `{fingerprint, serverMemo}` pairs.
//!   A memo that fails verification is rejected before any property is
//!   applied; it is the only defense against clients editing `data`.
//! - [`UploadUrlSigner`] issues and validates expiring signed upload URLs,
//!   independent of the memo checksum.

mod checksum;
mod upload;

pub use checksum::ChecksumGuard;
pub use upload::{SignedUploadUrl, UploadSignatureError, UploadUrlSigner};
