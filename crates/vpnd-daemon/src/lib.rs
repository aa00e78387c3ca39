//! vpnd - демон VPN клиента
//!
//! Системные реализации для сервиса подключения:
//! - WireGuard через wg-quick и OpenVPN через бинарный файл openvpn
//! - DNS через resolv.conf
//! - Детектор изменений маршрутизации на основе `ip route`
//! - Хранилище настроек в JSON и рассылка событий подписчикам

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod daemon;
pub mod factory;
pub mod firewall;
pub mod openvpn;
pub mod prefs_store;
pub mod resolvconf;
pub mod routes;
pub mod shell;
pub mod subscribers;
pub mod wireguard;

pub use config::DaemonConfig;
pub use daemon::{build_service, seed_preferences};
pub use factory::SystemProcessFactory;
pub use firewall::StateOnlyFirewall;
pub use openvpn::{OpenVpnProcess, OpenVpnSettings};
pub use prefs_store::JsonPreferencesStore;
pub use resolvconf::ResolvConfDns;
pub use routes::{PollingRouteDetector, SystemNetInfo};
pub use subscribers::{ServiceEvent, Subscribers};
pub use wireguard::{WireGuardProcess, WireGuardSettings};
