use rand::RngCore;
use zeroize::Zeroizing;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("invalid public key format: {0}")]
    InvalidKeyFormat(String),
    #[error("encryption failed: {0}")]
    Failed(String),
}

/// Crypto port of the rotation engine. The asymmetric scheme (ECIES
/// over the chain's curve) is supplied by the embedding node; key
/// material is zeroized on drop.
pub trait KeyCipher: Send + Sync + 'static {
    /// Fresh 256-bit symmetric feed key.
    fn generate_symmetric_key(&self) -> Zeroizing<Vec<u8>> {
        let mut key = Zeroizing::new(vec![0u8; 32]);
        rand::rngs::OsRng.fill_bytes(&mut key);
        key
    }

    /// Encrypts the symmetric key under one member's public
    /// encryption key.
    fn encrypt_for(&self, plaintext: &[u8], public_key: &str) -> Result<Vec<u8>, CipherError>;
}
