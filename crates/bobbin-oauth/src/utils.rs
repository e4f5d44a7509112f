use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use elliptic_curve::SecretKey;
use jose_jwk::{Key, crypto};
use rand::{CryptoRng, RngCore, rngs::ThreadRng};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;
use std::cmp::Ordering;

use crate::{FALLBACK_ALG, types::OAuthAuthorizationServerMetadata};

/// Generate a fresh signing key for the first algorithm we support.
pub fn generate_key(allowed_algos: &[SmolStr]) -> Option<Key> {
    for alg in allowed_algos {
        if alg == "ES256" {
            return Some(Key::from(&crypto::Key::from(
                SecretKey::<p256::NistP256>::random(&mut ThreadRng::default()),
            )));
        }
    }
    None
}

/// Random opaque value, used for `state`.
pub fn generate_nonce() -> SmolStr {
    URL_SAFE_NO_PAD
        .encode(get_random_values::<_, 16>(&mut ThreadRng::default()))
        .into()
}

/// PKCE code verifier: 43 random bytes, 58 base64url characters.
pub fn generate_verifier() -> SmolStr {
    URL_SAFE_NO_PAD
        .encode(get_random_values::<_, 43>(&mut ThreadRng::default()))
        .into()
}

pub fn get_random_values<R, const LEN: usize>(rng: &mut R) -> [u8; LEN]
where
    R: RngCore + CryptoRng,
{
    let mut bytes = [0u8; LEN];
    rng.fill_bytes(&mut bytes);
    bytes
}

// 256K > ES (256 > 384 > 512) > PS (256 > 384 > 512) > RS (256 > 384 > 512) > other (in original order)
pub fn compare_algos(a: &SmolStr, b: &SmolStr) -> Ordering {
    if a == "ES256K" {
        return Ordering::Less;
    }
    if b == "ES256K" {
        return Ordering::Greater;
    }
    for prefix in ["ES", "PS", "RS"] {
        if let Some(stripped_a) = a.strip_prefix(prefix) {
            if let Some(stripped_b) = b.strip_prefix(prefix) {
                if let (Ok(len_a), Ok(len_b)) =
                    (stripped_a.parse::<u32>(), stripped_b.parse::<u32>())
                {
                    return len_a.cmp(&len_b);
                }
            } else {
                return Ordering::Less;
            }
        } else if b.starts_with(prefix) {
            return Ordering::Greater;
        }
    }
    Ordering::Equal
}

/// S256 challenge for a verifier.
pub fn pkce_challenge(verifier: &str) -> SmolStr {
    URL_SAFE_NO_PAD
        .encode(Sha256::digest(verifier.as_bytes()))
        .into()
}

/// Returns `(challenge, verifier)`.
pub fn generate_pkce() -> (SmolStr, SmolStr) {
    // https://datatracker.ietf.org/doc/html/rfc7636#section-4.1
    let verifier = generate_verifier();
    (pkce_challenge(&verifier), verifier)
}

/// Key for a new session, preferring the server's strongest advertised algorithm.
pub fn generate_dpop_key(metadata: &OAuthAuthorizationServerMetadata) -> Option<Key> {
    let mut algs = if metadata.dpop_signing_alg_values_supported.is_empty() {
        vec![SmolStr::new_static(FALLBACK_ALG)]
    } else {
        metadata.dpop_signing_alg_values_supported.clone()
    };
    algs.sort_by(compare_algos);
    generate_key(&algs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_matches_rfc7636_appendix_b() {
        assert_eq!(
            pkce_challenge("dBjftJeZ4CVP-mJ92IZ1l0Kyi1YiwLK0ycbXW-Uqowc"),
            "E9Melhoa2OwvFWJmWIdRhB1a7UWkbZRgELW8Rthbg9U"
        );
    }

    #[test]
    fn verifier_is_long_and_url_safe() {
        let (challenge, verifier) = generate_pkce();
        assert!(verifier.len() >= 43);
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert!(!challenge.contains('='));
        assert_ne!(generate_verifier(), verifier);
    }

    #[test]
    fn algorithm_preference() {
        let mut algs: Vec<SmolStr> = ["RS256", "ES384", "ES256", "PS256", "ES256K"]
            .into_iter()
            .map(SmolStr::new_static)
            .collect();
        algs.sort_by(compare_algos);
        assert_eq!(algs, ["ES256K", "ES256", "ES384", "PS256", "RS256"]);
    }

    #[test]
    fn dpop_key_generation() {
        let mut metadata = OAuthAuthorizationServerMetadata::default();
        assert!(generate_dpop_key(&metadata).is_some());
        metadata.dpop_signing_alg_values_supported = vec!["RS256".into()];
        assert!(generate_dpop_key(&metadata).is_none());
        metadata.dpop_signing_alg_values_supported = vec!["RS256".into(), "ES256".into()];
        assert!(generate_dpop_key(&metadata).is_some());
    }
}
