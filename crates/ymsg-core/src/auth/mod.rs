//! Challenge-response authentication for the YMSG login handshake.
//!
//! # How login proves the password (for beginners)
//!
//! The password never crosses the wire.  Instead:
//!
//! 1. The client sends its username (AUTH).
//! 2. The server answers with a random *challenge* string (field `"94"`) and
//!    an algorithm flag (field `"13"`).
//! 3. Both sides run the same deterministic transform over
//!    `(username, password, challenge)` and the client sends the two results
//!    back in AUTHRESP fields `"6"` and `"96"`.
//!
//! The server validates the response with whichever algorithm *it* asked
//! for.  Picking the wrong one is not negotiable afterwards: the login is
//! simply refused.  That is why [`AuthVersion::from_flag`] is the only place
//! the choice is made.
//!
//! Both algorithms start from two password pre-hashes (see [`crypt`]):
//! one derived from the plain MD5 of the password and one from its
//! MD5-crypt.  V1 mixes them with the username and challenge in a
//! challenge-selected order; V2 uses them as keys of an HMAC-style SHA-256
//! construction.

#[cfg(feature = "auth")]
pub mod crypt;
#[cfg(feature = "auth")]
mod v1;
#[cfg(feature = "auth")]
mod v2;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while computing a challenge response.
///
/// Both are fatal to the login attempt; neither is retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The digest primitives were compiled out (`auth` feature disabled).
    #[error("digest primitives unavailable: built without the `auth` feature")]
    CryptoUnavailable,

    /// The server's challenge cannot be used.
    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),
}

/// Which challenge-response algorithm the server asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthVersion {
    V1,
    V2,
}

impl AuthVersion {
    /// Maps the AUTH packet's field `"13"` to an algorithm.
    ///
    /// Absent or `"0"` selects V1; any other value (`"1"`, `"2"`) selects V2.
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag.map(str::trim) {
            None | Some("0") | Some("") => AuthVersion::V1,
            Some(_) => AuthVersion::V2,
        }
    }
}

/// The two strings sent back in AUTHRESP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    /// Derived from the plain password hash; sent as field `"6"`.
    pub plain: String,
    /// Derived from the MD5-crypt password hash; sent as field `"96"`.
    pub crypt: String,
}

/// Computes the challenge response for one login attempt.
///
/// # Errors
///
/// - [`AuthError::InvalidChallenge`] if `challenge` is empty.
/// - [`AuthError::CryptoUnavailable`] if the crate was built without the
///   `auth` feature.
pub fn compute_response(
    version: AuthVersion,
    username: &str,
    password: &str,
    challenge: &str,
) -> Result<ChallengeResponse, AuthError> {
    if challenge.is_empty() {
        return Err(AuthError::InvalidChallenge("challenge is empty".to_string()));
    }
    compute_with_digests(version, username, password, challenge)
}

#[cfg(feature = "auth")]
fn compute_with_digests(
    version: AuthVersion,
    username: &str,
    password: &str,
    challenge: &str,
) -> Result<ChallengeResponse, AuthError> {
    let hashes = crypt::PasswordHashes::derive(password);
    let response = match version {
        AuthVersion::V1 => v1::respond(&hashes, username, challenge.as_bytes()),
        AuthVersion::V2 => v2::respond(&hashes, username, challenge.as_bytes()),
    };
    tracing::trace!(?version, "challenge response computed");
    Ok(response)
}

#[cfg(not(feature = "auth"))]
fn compute_with_digests(
    _version: AuthVersion,
    _username: &str,
    _password: &str,
    _challenge: &str,
) -> Result<ChallengeResponse, AuthError> {
    Err(AuthError::CryptoUnavailable)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_or_zero_flag_selects_v1() {
        assert_eq!(AuthVersion::from_flag(None), AuthVersion::V1);
        assert_eq!(AuthVersion::from_flag(Some("0")), AuthVersion::V1);
    }

    #[test]
    fn test_nonzero_flag_selects_v2() {
        assert_eq!(AuthVersion::from_flag(Some("1")), AuthVersion::V2);
        assert_eq!(AuthVersion::from_flag(Some("2")), AuthVersion::V2);
    }

    #[test]
    fn test_empty_challenge_is_rejected() {
        let err = compute_response(AuthVersion::V1, "testuser", "secret", "").unwrap_err();
        assert!(matches!(err, AuthError::InvalidChallenge(_)));
    }

    #[cfg(feature = "auth")]
    #[test]
    fn test_v1_is_deterministic_for_fixed_inputs() {
        // Arrange / Act
        let a = compute_response(AuthVersion::V1, "testuser", "secret", "abc123").unwrap();
        let b = compute_response(AuthVersion::V1, "testuser", "secret", "abc123").unwrap();

        // Assert
        assert_eq!(a, b);
        assert_ne!(a.plain, a.crypt);
    }

    #[cfg(feature = "auth")]
    #[test]
    fn test_v1_and_v2_differ_for_same_inputs() {
        // Arrange
        let v1 = compute_response(AuthVersion::V1, "testuser", "secret", "abc123").unwrap();

        // Act
        let v2 = compute_response(AuthVersion::V2, "testuser", "secret", "abc123").unwrap();

        // Assert
        assert_eq!(v2, compute_response(AuthVersion::V2, "testuser", "secret", "abc123").unwrap());
        assert_ne!(v1.plain, v2.plain);
        assert_ne!(v1.crypt, v2.crypt);
    }

    #[cfg(feature = "auth")]
    #[test]
    fn test_v1_known_answer() {
        let r = compute_response(AuthVersion::V1, "testuser", "secret", "abc123").unwrap();

        assert_eq!(r.plain, "gDkPwQA7qHTLxfqF8BUiLw--");
        assert_eq!(r.crypt, "yMbTYK01nNysBm20l7Ft9w--");
    }

    #[cfg(feature = "auth")]
    #[test]
    fn test_v2_known_answer() {
        let r = compute_response(AuthVersion::V2, "testuser", "secret", "abc123").unwrap();

        assert_eq!(r.plain, "H=Bh;B=i4;Q=6g;V=1p;C=D4,R=eD;I=km;U=1j,B=0e;N=fB,");
        assert_eq!(r.crypt, "T=89,m=BC,m=of;L=BB;H=Ep,D=em,Z=2b,X=A4;H=5a;H=F4,");
    }

    #[cfg(feature = "auth")]
    #[test]
    fn test_response_depends_on_password() {
        let a = compute_response(AuthVersion::V2, "testuser", "secret", "abc123").unwrap();
        let b = compute_response(AuthVersion::V2, "testuser", "Secret", "abc123").unwrap();
        assert_ne!(a, b);
    }

    #[cfg(not(feature = "auth"))]
    #[test]
    fn test_without_digests_reports_crypto_unavailable() {
        let err = compute_response(AuthVersion::V1, "testuser", "secret", "abc123").unwrap_err();
        assert_eq!(err, AuthError::CryptoUnavailable);
    }
}
