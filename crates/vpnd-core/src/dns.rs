//! Настройки DNS

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Шифрование DNS запросов
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsEncryption {
    /// Без шифрования
    #[default]
    None,
    /// DNS over TLS
    DnsOverTls,
    /// DNS over HTTPS
    DnsOverHttps,
}

/// Настройки DNS сервера
///
/// Пустые настройки означают DNS туннеля по умолчанию.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DnsSettings {
    /// IP адрес DNS сервера
    #[serde(default)]
    pub dns_host: String,
    /// Шифрование
    #[serde(default)]
    pub encryption: DnsEncryption,
    /// Шаблон URI для DoH/DoT
    #[serde(default)]
    pub doh_template: String,
}

impl DnsSettings {
    /// Настройки для DNS без шифрования
    pub fn from_ip(ip: IpAddr) -> Self {
        Self {
            dns_host: ip.to_string(),
            encryption: DnsEncryption::None,
            doh_template: String::new(),
        }
    }

    /// IP адрес DNS сервера
    pub fn ip(&self) -> Option<IpAddr> {
        self.dns_host.trim().parse().ok()
    }

    /// Настройки не заданы (пустой, нулевой или широковещательный адрес)
    pub fn is_empty(&self) -> bool {
        match self.ip() {
            None => true,
            Some(ip) => ip.is_unspecified() || ip == IpAddr::V4(Ipv4Addr::BROADCAST),
        }
    }

    /// IPv6 адрес DNS сервера
    pub fn is_ipv6(&self) -> Option<bool> {
        self.ip().map(|ip| ip.is_ipv6())
    }

    /// Строка для логов
    pub fn info_string(&self) -> String {
        if self.is_empty() {
            return "<none>".to_string();
        }
        let host = self.dns_host.trim();
        let template = self.doh_template.trim();
        match self.encryption {
            DnsEncryption::None => host.to_string(),
            DnsEncryption::DnsOverTls => format!("{} (DoT {})", host, template),
            DnsEncryption::DnsOverHttps => format!("{} (DoH {})", host, template),
        }
    }
}

impl fmt::Display for DnsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.info_string())
    }
}

/// Поддержка шифрования DNS платформой
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DnsEncryptionAbilities {
    /// DNS over HTTPS
    pub dns_over_https: bool,
    /// DNS over TLS
    pub dns_over_tls: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_settings() {
        assert!(DnsSettings::default().is_empty());

        let zero = DnsSettings {
            dns_host: "0.0.0.0".into(),
            ..Default::default()
        };
        assert!(zero.is_empty());

        let bcast = DnsSettings {
            dns_host: "255.255.255.255".into(),
            ..Default::default()
        };
        assert!(bcast.is_empty());

        let v6zero = DnsSettings {
            dns_host: "::".into(),
            ..Default::default()
        };
        assert!(v6zero.is_empty());

        let garbage = DnsSettings {
            dns_host: "not-an-ip".into(),
            ..Default::default()
        };
        assert!(garbage.is_empty());
    }

    #[test]
    fn test_info_string() {
        let plain = DnsSettings::from_ip("1.1.1.1".parse().unwrap());
        assert_eq!(plain.info_string(), "1.1.1.1");

        let doh = DnsSettings {
            dns_host: "9.9.9.9".into(),
            encryption: DnsEncryption::DnsOverHttps,
            doh_template: "https://dns.quad9.net/dns-query".into(),
        };
        assert_eq!(doh.info_string(), "9.9.9.9 (DoH https://dns.quad9.net/dns-query)");
        assert_eq!(DnsSettings::default().info_string(), "<none>");
    }

    #[test]
    fn test_ip_version() {
        let v6 = DnsSettings {
            dns_host: " 2606:4700::1111 ".into(),
            ..Default::default()
        };
        assert_eq!(v6.is_ipv6(), Some(true));
        assert_eq!(DnsSettings::default().is_ipv6(), None);
    }
}
