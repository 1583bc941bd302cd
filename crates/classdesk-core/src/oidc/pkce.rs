use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Random bytes behind a verifier; 32 bytes encode to the 43-char minimum
const VERIFIER_BYTES: usize = 32;

const STATE_BYTES: usize = 16;

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a PKCE code verifier (RFC 7636 §4.1)
pub fn generate_verifier() -> String {
    random_token(VERIFIER_BYTES)
}

/// S256 code challenge for a verifier: BASE64URL(SHA256(verifier))
pub fn compute_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Opaque value binding an authorization response to its request
pub fn generate_state() -> String {
    random_token(STATE_BYTES)
}
