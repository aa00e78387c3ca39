//! # vpnd Service (vpnd-service)
//!
//! Оркестратор VPN подключений демона.
//!
//! ## Структура
//!
//! - [`service`]: Сервис - connect/disconnect, цикл переподключения, kill switch, сессия
//! - [`firewall`]: Состояние firewall поверх платформенного бэкенда
//! - [`dns`]: Состояние DNS поверх платформенного бэкенда
//! - [`antitracker`]: Адреса DNS AntiTracker
//! - [`netchange`]: Детектор изменений маршрутизации и сетевая информация
//! - [`wgkeys`]: Генерация и периодическая смена ключей WireGuard
//! - [`events`]: Получатель событий сервиса
//! - [`splittun`]: Split tunnel
//! - [`factory`]: Фабрика VPN процессов и учётные данные
//! - [`api`]: REST API сервера
//! - [`preferences`]: Настройки и данные сессии
//! - [`state`]: Требуемое состояние подключения
//!
//! Платформенные реализации (процессы OpenVPN/WireGuard, DNS, детектор
//! маршрутов) живут в демоне, сервис работает только через трейты.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod antitracker;
pub mod api;
pub mod dns;
pub mod events;
pub mod factory;
pub mod firewall;
pub mod netchange;
pub mod preferences;
pub mod service;
pub mod splittun;
pub mod state;
pub mod wgkeys;

#[cfg(test)]
mod testutil;

// Re-экспорт основных типов для удобства
pub use antitracker::{AntiTrackerDns, AntiTrackerDnsInfo, AntiTrackerServers};
pub use api::{Api, SessionStatusResponse};
pub use dns::{Dns, DnsBackend};
pub use events::EventReceiver;
pub use factory::{ProcessFactory, VpnCredentials, WireGuardCredentials};
pub use firewall::{ConnectedClient, Firewall, FirewallBackend};
pub use netchange::{NetInterface, NetworkInfo, RouteChangeDetector};
pub use preferences::{
    AccountStatus, MemoryPreferencesStore, Preferences, PreferencesStore, SessionStatus,
};
pub use service::{reconnect_delay, KillSwitchState, Service, ServiceDeps};
pub use splittun::{NoSplitTunnel, SplitTunnel, SplitTunnelConfig};
pub use state::{RequiredState, VpnSessionInfo};
pub use wgkeys::{KeysManager, KeysReceiver, WireGuardKeysInfo};
