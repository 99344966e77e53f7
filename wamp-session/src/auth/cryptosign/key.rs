use anyhow::{
    Error,
    Result,
};
use ed25519_dalek::{
    Signature,
    Signer,
    SigningKey,
    VerifyingKey,
};

use crate::auth::cryptosign::hex::{
    from_hex,
    to_hex,
};

/// An Ed25519 private key used for WAMP-cryptosign.
///
/// Keys are configuration input. The secret half is never printed.
#[derive(Clone)]
pub struct CryptosignKey {
    signing_key: SigningKey,
}

impl CryptosignKey {
    /// Creates a key from its 32-byte secret seed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::msg("cryptosign private key must be 32 bytes"))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(bytes),
        })
    }

    /// Creates a key from its hex-encoded 32-byte secret seed.
    pub fn from_hex(s: &str) -> Result<Self> {
        Self::from_bytes(&from_hex(s.trim())?)
    }

    /// The public key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The hex-encoded public key, as announced in HELLO.
    pub fn public_key_hex(&self) -> String {
        to_hex(self.verifying_key().as_bytes())
    }

    /// Signs the message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl std::fmt::Debug for CryptosignKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptosignKey")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}
