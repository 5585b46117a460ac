//! Algorithm V2: keyed SHA-256 over the challenge.
//!
//! Each password pre-hash keys an HMAC-shaped construction:
//!
//! ```text
//! magic = md5(challenge || username)[..4]
//! key   = pre_hash, zero-padded to 64 bytes
//! inner = sha256((key ^ 0x36) || magic || challenge)
//! outer = sha256((key ^ 0x5c) || inner)
//! ```
//!
//! The first 20 bytes of `outer` are then rendered as ten 5-character groups
//! using three lookup alphabets.
//!
//! This keyed construction is this crate's own, not the official client's
//! v10 algorithm; the two share only the flag value and the output
//! alphabets.

use sha2::{Digest as _, Sha256};

use super::crypt::PasswordHashes;
use super::ChallengeResponse;

const BLOCK_SIZE: usize = 64;
const RENDERED_BYTES: usize = 20;

const ALPHA1: &[u8; 32] = b"FBZDWAGHrJTLMNOPQRSKUVEXYChImkwQ";
const ALPHA2: &[u8; 32] = b"F0E1D2C3B4A59687abcdefghijklmnop";
const DELIMITERS: &[u8; 2] = b",;";

pub(super) fn respond(
    hashes: &PasswordHashes,
    username: &str,
    challenge: &[u8],
) -> ChallengeResponse {
    let mut seeded = challenge.to_vec();
    seeded.extend_from_slice(username.as_bytes());
    let digest = md5::compute(&seeded);
    let magic = &digest.0[..4];

    ChallengeResponse {
        plain: render(&keyed_digest(hashes.password_hash.as_bytes(), magic, challenge)),
        crypt: render(&keyed_digest(hashes.crypt_hash.as_bytes(), magic, challenge)),
    }
}

fn keyed_digest(pre_hash: &[u8], magic: &[u8], challenge: &[u8]) -> [u8; 32] {
    let mut key = [0u8; BLOCK_SIZE];
    let n = pre_hash.len().min(BLOCK_SIZE);
    key[..n].copy_from_slice(&pre_hash[..n]);

    let inner_pad: Vec<u8> = key.iter().map(|b| b ^ 0x36).collect();
    let outer_pad: Vec<u8> = key.iter().map(|b| b ^ 0x5c).collect();

    let mut inner = Sha256::new();
    inner.update(&inner_pad);
    inner.update(magic);
    inner.update(challenge);
    let inner = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(&outer_pad);
    outer.update(inner);

    let mut out = [0u8; 32];
    out.copy_from_slice(&outer.finalize());
    out
}

fn render(digest: &[u8; 32]) -> String {
    let mut out = String::with_capacity(RENDERED_BYTES / 2 * 5);
    for pair in digest[..RENDERED_BYTES].chunks_exact(2) {
        let v = (usize::from(pair[0]) << 8) | usize::from(pair[1]);
        out.push(char::from(ALPHA1[(v >> 11) & 31]));
        out.push('=');
        out.push(char::from(ALPHA2[(v >> 6) & 31]));
        out.push(char::from(ALPHA2[(v >> 1) & 31]));
        out.push(char::from(DELIMITERS[v & 1]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_produces_ten_groups() {
        let rendered = render(&[0u8; 32]);
        assert_eq!(rendered.len(), 50);
        assert!(rendered.starts_with("F=FF,"));
    }

    #[test]
    fn test_render_maps_bit_fields() {
        // Arrange – v = 0xFFFF: every index is 31, delimiter index is 1
        let mut digest = [0u8; 32];
        digest[0] = 0xFF;
        digest[1] = 0xFF;

        // Act
        let rendered = render(&digest);

        // Assert
        assert_eq!(&rendered[..5], "Q=pp;");
    }

    #[test]
    fn test_username_changes_response() {
        let hashes = PasswordHashes::derive("secret");
        let a = respond(&hashes, "testuser", b"abc123");
        let b = respond(&hashes, "otheruser", b"abc123");
        assert_ne!(a.plain, b.plain);
    }
}
