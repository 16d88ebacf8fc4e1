//! Challenge/response password authentication.
//!
//! The host sends a fresh random challenge and salt. Both sides stretch the
//! table password with the salt into a key, and the client proves knowledge
//! of it by returning `HMAC-SHA256(key, challenge || salt)`. The password
//! itself never crosses the wire and a response is useless for any other
//! challenge.

use crate::error::{ProtocolError, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

type HmacSha256 = Hmac<Sha256>;

pub const CHALLENGE_LEN: usize = 32;
pub const SALT_LEN: usize = 16;

/// Key-stretching rounds. Part of the protocol; both sides must agree.
pub const KEY_ITERATIONS: u32 = 1000;

/// Table password, zeroed on drop and wipeable after use.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Password {
    secret: Vec<u8>,
    wiped: bool,
}

impl Password {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into().into_bytes(),
            wiped: false,
        }
    }

    /// The secret, or `None` once wiped.
    pub fn expose(&self) -> Option<&[u8]> {
        (!self.wiped).then_some(self.secret.as_slice())
    }

    pub fn wipe(&mut self) {
        self.secret.zeroize();
        self.wiped = true;
    }

    pub fn is_wiped(&self) -> bool {
        self.wiped
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.wiped { "<wiped>" } else { "<redacted>" };
        f.write_str(shown)
    }
}

/// Fresh single-use challenge and salt.
pub fn generate_challenge() -> (Vec<u8>, Vec<u8>) {
    let mut rng = rand::rng();
    let mut challenge = vec![0u8; CHALLENGE_LEN];
    let mut salt = vec![0u8; SALT_LEN];
    rng.fill_bytes(&mut challenge);
    rng.fill_bytes(&mut salt);
    (challenge, salt)
}

fn mac(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| ProtocolError::KeyError(err.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Stretches `password` with `salt` over [`KEY_ITERATIONS`] rounds.
fn derive_key(password: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let mut key = Zeroizing::new(mac(password, &[salt])?);
    for _ in 1..KEY_ITERATIONS {
        *key = mac(password, &[key.as_slice()])?;
    }
    Ok(key)
}

/// Response a client sends for `challenge` and `salt`.
pub fn compute_response(password: &[u8], challenge: &[u8], salt: &[u8]) -> Result<Vec<u8>> {
    let key = derive_key(password, salt)?;
    Ok(mac(key.as_slice(), &[challenge, salt])?.to_vec())
}

/// Recomputes the expected response and compares in constant time.
pub fn verify_response(
    password: &[u8],
    challenge: &[u8],
    salt: &[u8],
    response: &[u8],
) -> Result<bool> {
    let expected = compute_response(password, challenge, salt)?;
    if expected.len() != response.len() {
        return Ok(false);
    }
    Ok(expected.ct_eq(response).into())
}
