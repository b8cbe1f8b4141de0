use rand::RngCore;
use rand::rngs::OsRng;

/// Bytes of OS randomness behind every opaque secret (256 bits).
pub const SECRET_BYTES: usize = 32;

/// Length of a hex-encoded secret.
pub const SECRET_HEX_LEN: usize = SECRET_BYTES * 2;

/// Generate an unguessable lowercase hex string for session ids and activation tokens.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Whether `value` has the shape of a secret produced by [`generate_secret`].
#[must_use]
pub fn is_well_formed_secret(value: &str) -> bool {
    value.len() == SECRET_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret_shape() {
        let secret = generate_secret();
        assert_eq!(secret.len(), SECRET_HEX_LEN);
        assert!(is_well_formed_secret(&secret));
    }

    #[test]
    fn test_secret_uniqueness() {
        let secrets: std::collections::HashSet<String> =
            (0..1000).map(|_| generate_secret()).collect();
        assert_eq!(secrets.len(), 1000);
    }

    #[test]
    fn test_is_well_formed_secret() {
        assert!(is_well_formed_secret(&"a1".repeat(32)));
        assert!(!is_well_formed_secret("abc"));
        assert!(!is_well_formed_secret(&"A1".repeat(32)));
        assert!(!is_well_formed_secret(&"zz".repeat(32)));
    }
}
