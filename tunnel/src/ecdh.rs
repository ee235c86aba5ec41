//! Ephemeral Curve25519 key agreement.
//!
//! One keypair per tunnel on each side. The secret half is consumed by
//! [`shared_secret`], so it cannot outlive the exchange it was made for.

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey};

/// Generate a fresh ephemeral keypair from the process CSPRNG.
pub fn generate_keypair() -> (EphemeralSecret, PublicKey) {
    let secret = EphemeralSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

/// Derive the 32-byte shared secret, consuming the ephemeral secret.
pub fn shared_secret(secret: EphemeralSecret, peer: &PublicKey) -> [u8; 32] {
    *secret.diffie_hellman(peer).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_the_same_secret() {
        let (a_secret, a_public) = generate_keypair();
        let (b_secret, b_public) = generate_keypair();
        assert_eq!(
            shared_secret(a_secret, &b_public),
            shared_secret(b_secret, &a_public),
        );
    }

    #[test]
    fn keypairs_are_fresh() {
        let (_, a) = generate_keypair();
        let (_, b) = generate_keypair();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
