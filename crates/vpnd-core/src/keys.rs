//! Ключи WireGuard
//!
//! Этот модуль отвечает за:
//! - Генерацию пары ключей X25519 для WireGuard
//! - Кодирование ключей в base64 (формат wg/wg-quick)
//! - Проверку ключей, полученных извне

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand_core::{CryptoRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::KeyError;

/// Размер ключа WireGuard (32 байта)
pub const WG_KEY_SIZE: usize = 32;

/// Пара ключей WireGuard в формате base64 (приватный ключ зануляется)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WireGuardKeyPair {
    public: String,
    private: String,
}

impl WireGuardKeyPair {
    /// Сгенерировать новую пару ключей
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = StaticSecret::random_from_rng(rng);
        let public = PublicKey::from(&secret);
        Self {
            public: STANDARD.encode(public.as_bytes()),
            private: STANDARD.encode(secret.to_bytes()),
        }
    }

    /// Восстановить пару из приватного ключа в base64
    pub fn from_private(private: &str) -> Result<Self, KeyError> {
        let mut bytes = decode_key(private)?;
        let secret = StaticSecret::from(bytes);
        bytes.zeroize();
        let public = PublicKey::from(&secret);
        Ok(Self {
            public: STANDARD.encode(public.as_bytes()),
            private: private.trim().to_string(),
        })
    }

    /// Публичный ключ (base64)
    pub fn public_key(&self) -> &str {
        &self.public
    }

    /// Приватный ключ (base64)
    pub fn private_key(&self) -> &str {
        &self.private
    }
}

impl std::fmt::Debug for WireGuardKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireGuardKeyPair")
            .field("public", &self.public)
            .field("private", &"<hidden>")
            .finish()
    }
}

/// Декодировать ключ WireGuard из base64
pub fn decode_key(value: &str) -> Result<[u8; WG_KEY_SIZE], KeyError> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|_| KeyError::InvalidBase64)?;
    if bytes.len() != WG_KEY_SIZE {
        return Err(KeyError::InvalidKeySize {
            expected: WG_KEY_SIZE,
            actual: bytes.len(),
        });
    }
    let mut key = [0u8; WG_KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Проверить, что строка содержит только ключ в base64
///
/// Ключ попадает в конфигурационный файл, поэтому любые другие данные запрещены.
pub fn validate_key(value: &str) -> Result<(), KeyError> {
    decode_key(value).map(|_| ())
}
