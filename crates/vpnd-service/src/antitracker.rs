//! AntiTracker
//!
//! Этот модуль отвечает за:
//! - Интерфейс получения адреса DNS сервера AntiTracker
//! - Адреса из конфигурации серверов (обычный/hardcore, одиночный/multihop)
//! - Выбор DNS попытки: AntiTracker важнее пользовательского DNS

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use vpnd_core::{AntiTrackerMetadata, DnsSettings, Error, Result};

/// Источник адресов DNS серверов AntiTracker
pub trait AntiTrackerDns: Send + Sync {
    /// Адрес DNS сервера для режима
    fn resolve(&self, hardcore: bool, multihop: bool) -> Result<IpAddr>;
}

/// Адреса DNS сервера AntiTracker одного режима
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntiTrackerDnsInfo {
    /// Адрес для обычного подключения
    #[serde(default)]
    pub ip: Option<IpAddr>,
    /// Адрес для multihop подключения
    #[serde(default)]
    pub multihop_ip: Option<IpAddr>,
}

/// Адреса AntiTracker из конфигурации серверов
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntiTrackerServers {
    /// Обычный режим
    #[serde(default)]
    pub default: AntiTrackerDnsInfo,
    /// Режим hardcore
    #[serde(default)]
    pub hardcore: AntiTrackerDnsInfo,
}

impl AntiTrackerDns for AntiTrackerServers {
    fn resolve(&self, hardcore: bool, multihop: bool) -> Result<IpAddr> {
        let info = if hardcore {
            &self.hardcore
        } else {
            &self.default
        };
        let ip = if multihop { info.multihop_ip } else { info.ip };

        ip.ok_or_else(|| {
            Error::Dns(format!(
                "адрес AntiTracker не задан (hardcore: {}, multihop: {})",
                hardcore, multihop
            ))
        })
    }
}

/// DNS для подключения
///
/// Включённый AntiTracker заменяет пользовательский DNS.
pub fn effective_dns(
    provider: &dyn AntiTrackerDns,
    manual: &DnsSettings,
    anti_tracker: AntiTrackerMetadata,
    multihop: bool,
) -> Result<DnsSettings> {
    if !anti_tracker.enabled {
        return Ok(manual.clone());
    }
    let ip = provider.resolve(anti_tracker.hardcore, multihop)?;
    Ok(DnsSettings::from_ip(ip))
}
