use ring::{digest, hmac};
use subtle::ConstantTimeEq;

/// Lowercase hex SHA-256 digest of `bytes`. Used for schedule hashes, proof
/// hashes, and ref hashes — anywhere the spec calls for "SHA-256(...)".
pub fn digest_hex(bytes: &[u8]) -> String {
    let d = digest::digest(&digest::SHA256, bytes);
    hex::encode(d.as_ref())
}

/// Raw 32-byte SHA-256 digest.
pub fn digest_bytes(bytes: &[u8]) -> [u8; 32] {
    let d = digest::digest(&digest::SHA256, bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    out
}

/// `refHash = SHA-256(providerRef || ':' || loanId || ':' || direction)`.
pub fn ref_hash(provider_ref: &str, loan_id: &str, direction: &str) -> String {
    let preimage = format!("{provider_ref}:{loan_id}:{direction}");
    digest_hex(preimage.as_bytes())
}

/// HMAC-SHA-256(secret, rawBody), hex-encoded lowercase. The webhook
/// signature format named in spec §6.
pub fn hmac_sha256_hex(secret: &[u8], raw_body: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let tag = hmac::sign(&key, raw_body);
    hex::encode(tag.as_ref())
}

/// Constant-time comparison of a computed HMAC hex digest against the
/// provider-supplied one, so that a mistimed byte-by-byte compare can't leak
/// the secret's contents through response latency.
pub fn verify_hmac_hex(expected_hex: &str, candidate_hex: &str) -> bool {
    // Compare as decoded bytes so hex case differences don't defeat matching,
    // while still running in constant time over the decoded representation.
    let (Ok(expected), Ok(candidate)) =
        (hex::decode(expected_hex), hex::decode(candidate_hex))
    else {
        return false;
    };
    expected.ct_eq(&candidate).into()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_input_sanity() {
        // Known SHA-256("") vector.
        assert_eq!(
            digest_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hmac_matches_known_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let mac = hmac_sha256_hex(b"key", b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            mac,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn verify_hmac_rejects_tampering() {
        let mac = hmac_sha256_hex(b"secret", b"payload");
        assert!(verify_hmac_hex(&mac, &mac));
        assert!(!verify_hmac_hex(&mac, &hmac_sha256_hex(b"secret", b"tampered")));
    }
}
