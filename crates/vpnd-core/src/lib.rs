//! # vpnd Core (vpnd-core)
//!
//! Общая модель данных демона VPN клиента.
//!
//! ## Структура
//!
//! - [`error`]: Типы ошибок
//! - [`state`]: Тип VPN и состояния подключения
//! - [`dns`]: Настройки DNS
//! - [`params`]: Параметры подключения OpenVPN/WireGuard
//! - [`keys`]: Ключи WireGuard (X25519, base64)
//! - [`process`]: Интерфейс VPN процесса
//!
//! ## Пример использования
//!
//! ```rust
//! use vpnd_core::{ConnectionParams, WireGuardHost, WireGuardKeyPair};
//! use rand::rngs::OsRng;
//!
//! let server_key = WireGuardKeyPair::generate(&mut OsRng);
//!
//! let mut params = ConnectionParams::wireguard();
//! params.wireguard.entry_hosts = vec![WireGuardHost {
//!     hostname: "nl1".into(),
//!     host: "198.51.100.7".parse().unwrap(),
//!     public_key: server_key.public_key().to_string(),
//!     local_ip: "172.16.0.1".parse().unwrap(),
//! }];
//! params.normalize_hosts(&mut rand::thread_rng());
//! assert!(params.validate().is_ok());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dns;
pub mod error;
pub mod keys;
pub mod params;
pub mod process;
pub mod state;

// Re-экспорт основных типов для удобства
pub use dns::{DnsEncryption, DnsEncryptionAbilities, DnsSettings};
pub use error::{ApiError, Error, KeyError, Result};
pub use keys::WireGuardKeyPair;
pub use params::{
    AntiTrackerMetadata, ConnectionParams, OpenVpnHost, OpenVpnParams, ProxyParams, ProxyType,
    WireGuardHost, WireGuardParams,
};
pub use process::Process;
pub use state::{StateInfo, VpnState, VpnType};

/// Версия библиотеки
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
