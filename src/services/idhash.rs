// Stable identifiers for catalog entities, users and playlists.

use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Length of every generated id.
pub const ID_LEN: usize = 20;

/// Deterministic 20 character base62 id derived from `s`.
///
/// The top 128 bits of the SHA-256 digest are shifted right by 9, leaving
/// 119 bits which always fit in 20 base62 digits.
pub fn id_hash(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    let mut top = [0u8; 16];
    top.copy_from_slice(&digest[..16]);
    encode(top)
}

/// Random id in the same alphabet and length as [`id_hash`].
pub fn random_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    encode(bytes)
}

fn encode(bytes: [u8; 16]) -> String {
    let mut n = u128::from_be_bytes(bytes) >> 9;
    let mut out = [b'0'; ID_LEN];
    for slot in out.iter_mut().rev() {
        *slot = ALPHABET[(n % 62) as usize];
        n /= 62;
    }
    // Only ASCII from ALPHABET was written.
    String::from_utf8_lossy(&out).into_owned()
}
