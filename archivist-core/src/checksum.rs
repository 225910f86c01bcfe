/*!
SHA-256 checksums over final archive bytes.

The checksum covers the on-disk representation (after compression and
encryption), so it is verified before any decryption is attempted.
*/

use sha2::{Digest, Sha256};

use crate::{ArchivistError, Result};

/// Compute the lowercase hex SHA-256 digest of `data`
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Verify `data` against an expected digest
///
/// # Returns
/// Ok(()) if the digest matches, Err(ArchivistError::ChecksumMismatch) otherwise
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<()> {
    let actual = compute_checksum(data);
    if actual == expected {
        Ok(())
    } else {
        Err(ArchivistError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
