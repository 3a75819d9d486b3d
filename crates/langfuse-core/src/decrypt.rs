use secrecy::SecretString;
use thiserror::Error;

/// Failure to decrypt a stored credential
#[derive(Debug, Error)]
#[error("failed to decrypt secret: {0}")]
pub struct DecryptError(pub String);

/// Decrypts credentials stored encrypted at rest
///
/// Implemented by the host application; the adapter layer only consumes it.
pub trait KeyDecryptor: Send + Sync {
    /// Decrypt a single ciphertext into a secret
    fn decrypt(&self, ciphertext: &str) -> Result<SecretString, DecryptError>;
}
