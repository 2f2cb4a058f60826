//! Webhook signature verification.
//!
//! GitHub signs each delivery with an HMAC of the raw request body keyed by the
//! shared secret. The digest is sent hex-encoded with an algorithm tag, either
//! `X-Hub-Signature-256: sha256=<hex>` or the legacy `X-Hub-Signature: sha1=<hex>`.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

pub const SIGNATURE_256_HEADER: &str = "X-Hub-Signature-256";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,
    #[error("signature header malformed")]
    Malformed,
    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    Sha256(Vec<u8>),
    Sha1(Vec<u8>),
}

impl Signature {
    /// Parse a header value of the form `<algorithm>=<hex digest>`.
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let (algorithm, digest) = header.split_once('=').ok_or(SignatureError::Malformed)?;
        let digest = hex::decode(digest).map_err(|_| SignatureError::Malformed)?;
        match algorithm {
            "sha256" => Ok(Self::Sha256(digest)),
            "sha1" => Ok(Self::Sha1(digest)),
            _ => Err(SignatureError::Malformed),
        }
    }

    /// Constant-time check of `body` against this signature.
    pub fn verify(&self, secret: &[u8], body: &[u8]) -> Result<(), SignatureError> {
        let result = match self {
            Self::Sha256(digest) => {
                let mut mac = Hmac::<Sha256>::new_from_slice(secret)
                    .expect("HMAC can take key of any size");
                mac.update(body);
                mac.verify_slice(digest)
            }
            Self::Sha1(digest) => {
                let mut mac =
                    Hmac::<Sha1>::new_from_slice(secret).expect("HMAC can take key of any size");
                mac.update(body);
                mac.verify_slice(digest)
            }
        };
        result.map_err(|_| SignatureError::Mismatch)
    }
}

/// Verify a delivery given the values of the SHA-256 and SHA-1 signature
/// headers. The SHA-256 header takes precedence when both are present.
pub fn verify(
    secret: &[u8],
    body: &[u8],
    sha256_header: Option<&str>,
    sha1_header: Option<&str>,
) -> Result<(), SignatureError> {
    let header = sha256_header.or(sha1_header).ok_or(SignatureError::Missing)?;
    Signature::parse(header)?.verify(secret, body)
}

/// Compute the `X-Hub-Signature-256` header value for `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"It's a Secret to Everybody";
    const BODY: &[u8] = b"Hello, World!";

    #[test]
    fn test_known_vector() {
        // Example from GitHub's webhook validation documentation.
        let expected = "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";
        assert_eq!(sign(SECRET, BODY), expected);
        verify(SECRET, BODY, Some(expected), None).unwrap();
    }

    #[test]
    fn test_sha1_header() {
        let mut mac = Hmac::<Sha1>::new_from_slice(SECRET).unwrap();
        mac.update(BODY);
        let header = format!("sha1={}", hex::encode(mac.finalize().into_bytes()));
        verify(SECRET, BODY, None, Some(&header)).unwrap();
        assert_eq!(verify(b"other", BODY, None, Some(&header)), Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_prefers_sha256() {
        let good = sign(SECRET, BODY);
        verify(SECRET, BODY, Some(&good), Some("sha1=00")).unwrap();
    }

    #[test]
    fn test_tampered_body() {
        let header = sign(SECRET, BODY);
        let mut body = BODY.to_vec();
        for bit in 0..body.len() * 8 {
            body[bit / 8] ^= 1 << (bit % 8);
            assert_eq!(verify(SECRET, &body, Some(&header), None), Err(SignatureError::Mismatch));
            body[bit / 8] ^= 1 << (bit % 8);
        }
    }

    #[test]
    fn test_malformed_headers() {
        let cases: &[(Option<&str>, SignatureError)] = &[
            (None, SignatureError::Missing),
            (Some(""), SignatureError::Malformed),
            (Some("abcd1234"), SignatureError::Malformed),
            (Some("sha256=xyz"), SignatureError::Malformed),
            (Some("md5=abcd"), SignatureError::Malformed),
            (Some("sha256="), SignatureError::Mismatch),
        ];
        for &(header, expected) in cases {
            assert_eq!(verify(SECRET, BODY, header, None), Err(expected), "header {header:?}");
        }
    }
}
