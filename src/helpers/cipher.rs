use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};

const NONCE_LEN: usize = 12;

/// Encrypt/decrypt capability for secret env var values.
///
/// Stored form is `base64(nonce || ciphertext)`; the nonce is generated per
/// value so no side storage is needed to decrypt.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher(..)")
    }
}

impl SecretCipher {
    pub fn new(key: &str) -> Result<Self, String> {
        let key = key.as_bytes();
        if key.len() != 32 {
            return Err(format!(
                "encryption key must be 32 bytes long, got {}",
                key.len()
            ));
        }
        let key: &Key<Aes256Gcm> = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    #[tracing::instrument(name = "SecretCipher::encrypt", skip_all)]
    pub fn encrypt(&self, plaintext: &str) -> Result<String, String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng); // 96-bits; unique per message
        let cipher_vec = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| format!("encrypt error {:?}", e))?;

        let mut stored = nonce.to_vec();
        stored.extend_from_slice(&cipher_vec);
        Ok(general_purpose::STANDARD.encode(stored))
    }

    #[tracing::instrument(name = "SecretCipher::decrypt", skip_all)]
    pub fn decrypt(&self, stored: &str) -> Result<String, String> {
        let raw = general_purpose::STANDARD
            .decode(stored)
            .map_err(|e| format!("b64_decode error {}", e))?;
        if raw.len() <= NONCE_LEN {
            return Err("encrypted value is truncated".to_string());
        }
        let (nonce, data) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), data)
            .map_err(|e| format!("decrypt error {:?}", e))?;

        String::from_utf8(plaintext).map_err(|e| format!("{:?}", e))
    }
}
