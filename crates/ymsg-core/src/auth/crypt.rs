//! Password pre-hashes shared by both authentication algorithms.
//!
//! - `y64` is Base64 over the alphabet `A-Z a-z 0-9 . _` with `-` as the
//!   padding character.
//! - `md5_crypt` is the classic `$1$` MD5-crypt password hash.

use base64::alphabet::Alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD};
use base64::Engine;

/// Salt used for the crypt pre-hash, in `$1$salt$` form.
pub const CRYPT_SALT: &str = "_2S43d5f";

const MD5_CRYPT_MAGIC: &str = "$1$";

const Y64_ALPHABET: Alphabet =
    match Alphabet::new("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789._") {
        Ok(alphabet) => alphabet,
        Err(_) => panic!("y64 alphabet must be 64 unique printable characters"),
    };

const Y64: GeneralPurpose = GeneralPurpose::new(&Y64_ALPHABET, PAD);

const CRYPT_ITOA64: &[u8; 64] =
    b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// The two password-derived keys every response is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHashes {
    /// `y64(md5(password))`
    pub password_hash: String,
    /// `y64(md5(md5_crypt(password, CRYPT_SALT)))`
    pub crypt_hash: String,
}

impl PasswordHashes {
    pub fn derive(password: &str) -> Self {
        let crypted = md5_crypt(password.as_bytes(), CRYPT_SALT);
        Self {
            password_hash: y64(&md5::compute(password.as_bytes()).0),
            crypt_hash: y64(&md5::compute(crypted.as_bytes()).0),
        }
    }
}

/// Encodes bytes with the y64 alphabet.
pub fn y64(bytes: &[u8]) -> String {
    Y64.encode(bytes).replace('=', "-")
}

/// Computes the `$1$` MD5-crypt hash of `password` with `salt`.
///
/// Only the first eight characters of the salt (up to any `$`) are used.
pub fn md5_crypt(password: &[u8], salt: &str) -> String {
    let salt = salt.split('$').next().unwrap_or_default();
    let salt = &salt.as_bytes()[..salt.len().min(8)];

    let mut ctx = md5::Context::new();
    ctx.consume(password);
    ctx.consume(MD5_CRYPT_MAGIC.as_bytes());
    ctx.consume(salt);

    let mut alt = md5::Context::new();
    alt.consume(password);
    alt.consume(salt);
    alt.consume(password);
    let alt = alt.compute().0;

    let mut remaining = password.len();
    while remaining > 0 {
        let n = remaining.min(16);
        ctx.consume(&alt[..n]);
        remaining -= n;
    }

    // Bit walk over the password length: a zero byte for set bits, the first
    // password byte for clear bits.
    let mut bits = password.len();
    while bits != 0 {
        if bits & 1 == 1 {
            ctx.consume([0u8]);
        } else {
            ctx.consume(&password[..1]);
        }
        bits >>= 1;
    }

    let mut digest = ctx.compute().0;

    for round in 0..1000 {
        let mut ctx = md5::Context::new();
        if round & 1 == 1 {
            ctx.consume(password);
        } else {
            ctx.consume(digest);
        }
        if round % 3 != 0 {
            ctx.consume(salt);
        }
        if round % 7 != 0 {
            ctx.consume(password);
        }
        if round & 1 == 1 {
            ctx.consume(digest);
        } else {
            ctx.consume(password);
        }
        digest = ctx.compute().0;
    }

    let mut out = String::with_capacity(MD5_CRYPT_MAGIC.len() + salt.len() + 1 + 22);
    out.push_str(MD5_CRYPT_MAGIC);
    out.push_str(&String::from_utf8_lossy(salt));
    out.push('$');

    let groups = [(0, 6, 12), (1, 7, 13), (2, 8, 14), (3, 9, 15), (4, 10, 5)];
    for (a, b, c) in groups {
        let v = (u32::from(digest[a]) << 16) | (u32::from(digest[b]) << 8) | u32::from(digest[c]);
        push_itoa64(&mut out, v, 4);
    }
    push_itoa64(&mut out, u32::from(digest[11]), 2);
    out
}

fn push_itoa64(out: &mut String, mut v: u32, count: usize) {
    for _ in 0..count {
        out.push(char::from(CRYPT_ITOA64[(v & 0x3F) as usize]));
        v >>= 6;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
