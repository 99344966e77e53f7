//! WAMP-cryptosign, a challenge-response authentication method based on Ed25519 signatures.
//!
//! The peer announces its public key in HELLO. The router challenges it with 32 random bytes,
//! and the peer answers with the signature of the challenge followed by the challenge itself,
//! hex-encoded.

mod authenticator;
mod hex;
mod key;
mod message;

pub use authenticator::ClientAuthenticator;
pub use hex::{
    from_hex,
    to_hex,
};
pub use key::CryptosignKey;
