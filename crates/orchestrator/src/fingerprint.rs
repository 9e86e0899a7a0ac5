//! Transaction fingerprints over ordered operation names.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use common::Fingerprint;
use sha2::{Digest, Sha512};

/// Pluggable string hash used for fingerprints.
pub trait HashAlgorithm: Send + Sync {
    fn hash(&self, input: &str) -> String;
}

/// SHA-512 digest of the UTF-8 input, base64 encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha512Base64;

impl HashAlgorithm for Sha512Base64 {
    fn hash(&self, input: &str) -> String {
        BASE64.encode(Sha512::digest(input.as_bytes()))
    }
}

impl<F> HashAlgorithm for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn hash(&self, input: &str) -> String {
        self(input)
    }
}

/// Hashes operation names joined with `|`, in the given order.
///
/// Returns `None` for an empty list.
pub fn compute_fingerprint<'a, I>(names: I, algorithm: &dyn HashAlgorithm) -> Option<Fingerprint>
where
    I: IntoIterator<Item = &'a str>,
{
    let names: Vec<&str> = names.into_iter().collect();
    if names.is_empty() {
        return None;
    }
    Some(Fingerprint::new(algorithm.hash(&names.join("|"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_has_no_fingerprint() {
        assert!(compute_fingerprint(std::iter::empty(), &Sha512Base64).is_none());
    }

    #[test]
    fn test_same_names_same_fingerprint() {
        let a = compute_fingerprint(["reserve", "charge", "ship"], &Sha512Base64);
        let b = compute_fingerprint(["reserve", "charge", "ship"], &Sha512Base64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_order_matters() {
        let a = compute_fingerprint(["reserve", "charge"], &Sha512Base64);
        let b = compute_fingerprint(["charge", "reserve"], &Sha512Base64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_names_are_pipe_joined() {
        let identity = |input: &str| input.to_string();
        let fingerprint = compute_fingerprint(["A", "B", "C"], &identity).unwrap();
        assert_eq!(fingerprint.as_str(), "A|B|C");
    }

    #[test]
    fn test_sha512_digest_length() {
        // 64 bytes encode to 88 base64 characters
        assert_eq!(Sha512Base64.hash("A").len(), 88);
    }
}
