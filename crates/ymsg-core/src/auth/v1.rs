//! Algorithm V1: challenge-ordered MD5.
//!
//! A selector byte from the challenge picks one of five layouts.  Each
//! layout names the challenge position that provides a checksum character
//! and the order in which (hash, username, challenge) follow it.

use super::crypt::{y64, PasswordHashes};
use super::ChallengeResponse;

#[derive(Clone, Copy)]
enum Part {
    Hash,
    User,
    Seed,
}

use Part::{Hash, Seed, User};

/// `(checksum source position, ordering)` per selector value.
const LAYOUTS: [(usize, [Part; 3]); 5] = [
    (7, [Hash, User, Seed]),
    (9, [User, Seed, Hash]),
    (15, [Seed, Hash, User]),
    (1, [User, Hash, Seed]),
    (3, [Hash, Seed, User]),
];

pub(super) fn respond(
    hashes: &PasswordHashes,
    username: &str,
    challenge: &[u8],
) -> ChallengeResponse {
    // Positions wrap for challenges shorter than 16 bytes.
    let at = |i: usize| challenge[i % challenge.len()];

    let selector = usize::from(at(15) % 8) % 5;
    let (checksum_pos, order) = LAYOUTS[selector];
    let checksum = at(usize::from(at(checksum_pos)) % 16);

    let build = |hash: &str| {
        let mut input = vec![checksum];
        for part in order {
            match part {
                Hash => input.extend_from_slice(hash.as_bytes()),
                User => input.extend_from_slice(username.as_bytes()),
                Seed => input.extend_from_slice(challenge),
            }
        }
        y64(&md5::compute(&input).0)
    };

    ChallengeResponse {
        plain: build(&hashes.password_hash),
        crypt: build(&hashes.crypt_hash),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_changes_with_challenge() {
        // Arrange – byte 15 is '0' (48 → selector 0) vs '1' (49 → selector 1)
        let hashes = PasswordHashes::derive("secret");
        let a = respond(&hashes, "testuser", b"ABCDEFGHIJKLMNO0");
        let b = respond(&hashes, "testuser", b"ABCDEFGHIJKLMNO1");

        // Assert
        assert_ne!(a, b);
    }

    #[test]
    fn test_responses_are_y64_md5_length() {
        let hashes = PasswordHashes::derive("secret");
        let r = respond(&hashes, "testuser", b"abc123");
        assert_eq!(r.plain.len(), 24);
        assert_eq!(r.crypt.len(), 24);
        assert!(r.plain.ends_with("--"));
    }
}
