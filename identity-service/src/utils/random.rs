//! Randomness for OTP codes, OAuth state and PKCE verifiers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};

pub const OTP_LENGTH: usize = 6;

/// Six decimal digits, leading zeros kept.
pub fn generate_otp() -> String {
    let code: u32 = OsRng.gen_range(0..1_000_000);
    format!("{:0width$}", code, width = OTP_LENGTH)
}

/// `byte_len` random bytes, base64url without padding.
pub fn random_url_token(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// RFC 7636 verifier: 32 bytes yields 43 characters.
pub fn generate_pkce_verifier() -> String {
    random_url_token(32)
}

/// S256 challenge for a verifier.
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
