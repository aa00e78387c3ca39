//! Параметры VPN подключения
//!
//! Этот модуль отвечает за:
//! - Описание параметров подключения для OpenVPN и WireGuard
//! - Нормализацию списка серверов (случайный выбор одного хоста)
//! - Валидацию параметров перед подключением

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::dns::DnsSettings;
use crate::error::{Error, Result};
use crate::keys;
use crate::state::VpnType;

/// Параметры подключения
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Протокол
    pub vpn_type: VpnType,

    /// Пользовательский DNS (пустой = DNS туннеля)
    #[serde(default)]
    pub manual_dns: DnsSettings,

    /// AntiTracker (имеет приоритет над пользовательским DNS)
    #[serde(default)]
    pub anti_tracker: AntiTrackerMetadata,

    /// Включить firewall перед подключением (остаётся включённым)
    #[serde(default)]
    pub firewall_on: bool,

    /// Включить firewall только на время подключения
    #[serde(default)]
    pub firewall_on_during_connection: bool,

    /// Параметры OpenVPN
    #[serde(default)]
    pub openvpn: OpenVpnParams,

    /// Параметры WireGuard
    #[serde(default)]
    pub wireguard: WireGuardParams,
}

/// Настройки AntiTracker (DNS сервера с блокировкой трекеров)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntiTrackerMetadata {
    /// AntiTracker включён
    #[serde(default)]
    pub enabled: bool,
    /// Режим hardcore (блокируются и крупные трекинговые сети)
    #[serde(default)]
    pub hardcore: bool,
}

/// Параметры OpenVPN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenVpnParams {
    /// Входные серверы
    #[serde(default)]
    pub entry_hosts: Vec<OpenVpnHost>,

    /// Порт сервера
    #[serde(default = "default_openvpn_port")]
    pub port: u16,

    /// Использовать TCP
    #[serde(default)]
    pub is_tcp: bool,

    /// Прокси
    #[serde(default)]
    pub proxy: Option<ProxyParams>,

    /// Сервер выхода (multihop)
    #[serde(default)]
    pub exit_server_id: String,
}

/// Сервер OpenVPN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenVpnHost {
    /// Имя сервера
    #[serde(default)]
    pub hostname: String,
    /// IP адрес сервера
    pub host: IpAddr,
}

/// Тип прокси для OpenVPN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    /// HTTP прокси
    Http,
    /// SOCKS прокси
    Socks,
}

impl ProxyType {
    /// Имя директивы OpenVPN
    pub fn directive(&self) -> &'static str {
        match self {
            ProxyType::Http => "http-proxy",
            ProxyType::Socks => "socks-proxy",
        }
    }
}

/// Параметры прокси
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyParams {
    /// Тип прокси
    pub proxy_type: ProxyType,
    /// Адрес прокси
    pub address: IpAddr,
    /// Порт прокси
    pub port: u16,
    /// Имя пользователя
    #[serde(default)]
    pub username: String,
    /// Пароль
    #[serde(default)]
    pub password: String,
}

/// Параметры WireGuard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireGuardParams {
    /// Входные серверы
    #[serde(default)]
    pub entry_hosts: Vec<WireGuardHost>,

    /// Порт сервера
    #[serde(default = "default_wireguard_port")]
    pub port: u16,

    /// MTU интерфейса (0 = по умолчанию)
    #[serde(default)]
    pub mtu: u16,
}

impl Default for OpenVpnParams {
    fn default() -> Self {
        Self {
            entry_hosts: Vec::new(),
            port: default_openvpn_port(),
            is_tcp: false,
            proxy: None,
            exit_server_id: String::new(),
        }
    }
}

impl Default for WireGuardParams {
    fn default() -> Self {
        Self {
            entry_hosts: Vec::new(),
            port: default_wireguard_port(),
            mtu: 0,
        }
    }
}

/// Сервер WireGuard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireGuardHost {
    /// Имя сервера
    #[serde(default)]
    pub hostname: String,
    /// IP адрес сервера
    pub host: IpAddr,
    /// Публичный ключ сервера (base64)
    pub public_key: String,
    /// Внутренний IP сервера в туннеле (DNS по умолчанию)
    pub local_ip: IpAddr,
}

fn default_openvpn_port() -> u16 {
    2049
}

fn default_wireguard_port() -> u16 {
    2049
}

impl ConnectionParams {
    /// Параметры подключения WireGuard без серверов
    pub fn wireguard() -> Self {
        Self {
            vpn_type: VpnType::WireGuard,
            manual_dns: DnsSettings::default(),
            anti_tracker: AntiTrackerMetadata::default(),
            firewall_on: false,
            firewall_on_during_connection: false,
            openvpn: OpenVpnParams::default(),
            wireguard: WireGuardParams::default(),
        }
    }

    /// Параметры подключения OpenVPN без серверов
    pub fn openvpn() -> Self {
        Self {
            vpn_type: VpnType::OpenVpn,
            ..Self::wireguard()
        }
    }

    /// Оставить один случайный сервер из списка
    ///
    /// Учётные данные прокси обрезаются до первой строки.
    pub fn normalize_hosts<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if let Some(host) = self.openvpn.entry_hosts.choose(rng).cloned() {
            self.openvpn.entry_hosts = vec![host];
        }
        if let Some(host) = self.wireguard.entry_hosts.choose(rng).cloned() {
            self.wireguard.entry_hosts = vec![host];
        }
        if let Some(proxy) = self.openvpn.proxy.as_mut() {
            proxy.username = first_line(&proxy.username);
            proxy.password = first_line(&proxy.password);
        }
    }

    /// Проверка параметров выбранного протокола
    pub fn validate(&self) -> Result<()> {
        match self.vpn_type {
            VpnType::OpenVpn => {
                if self.openvpn.entry_hosts.is_empty() {
                    return Err(Error::InvalidParams(
                        "не задан ни один сервер OpenVPN".into(),
                    ));
                }
                if self.openvpn.port == 0 {
                    return Err(Error::InvalidParams("порт OpenVPN не может быть 0".into()));
                }
            }
            VpnType::WireGuard => {
                if self.wireguard.entry_hosts.is_empty() {
                    return Err(Error::InvalidParams(
                        "не задан ни один сервер WireGuard".into(),
                    ));
                }
                if self.wireguard.port == 0 {
                    return Err(Error::InvalidParams(
                        "порт WireGuard не может быть 0".into(),
                    ));
                }
                for host in &self.wireguard.entry_hosts {
                    if keys::validate_key(&host.public_key).is_err() {
                        return Err(Error::InvalidParams(format!(
                            "публичный ключ сервера {} не является base64 строкой",
                            host.host
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Подключение через сервер выхода
    pub fn is_multihop(&self) -> bool {
        self.vpn_type == VpnType::OpenVpn && !self.openvpn.exit_server_id.trim().is_empty()
    }

    /// IP адрес выбранного сервера
    pub fn destination_ip(&self) -> Option<IpAddr> {
        match self.vpn_type {
            VpnType::OpenVpn => self.openvpn.entry_hosts.first().map(|h| h.host),
            VpnType::WireGuard => self.wireguard.entry_hosts.first().map(|h| h.host),
        }
    }
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::WireGuardKeyPair;
    use rand::rngs::OsRng;

    fn wg_host(last: u8) -> WireGuardHost {
        WireGuardHost {
            hostname: format!("wg{}", last),
            host: format!("198.51.100.{}", last).parse().unwrap(),
            public_key: WireGuardKeyPair::generate(&mut OsRng).public_key().to_string(),
            local_ip: "172.16.0.1".parse().unwrap(),
        }
    }

    #[test]
    fn test_normalize_picks_one_host() {
        let mut params = ConnectionParams::wireguard();
        params.wireguard.entry_hosts = vec![wg_host(1), wg_host(2), wg_host(3)];
        let all = params.wireguard.entry_hosts.clone();

        params.normalize_hosts(&mut rand::thread_rng());

        assert_eq!(params.wireguard.entry_hosts.len(), 1);
        assert!(all.contains(&params.wireguard.entry_hosts[0]));
        assert_eq!(
            params.destination_ip(),
            Some(params.wireguard.entry_hosts[0].host)
        );
    }

    #[test]
    fn test_normalize_truncates_proxy_credentials() {
        let mut params = ConnectionParams::openvpn();
        params.openvpn.entry_hosts = vec![OpenVpnHost {
            hostname: String::new(),
            host: "203.0.113.5".parse().unwrap(),
        }];
        params.openvpn.proxy = Some(ProxyParams {
            proxy_type: ProxyType::Http,
            address: "192.168.1.10".parse().unwrap(),
            port: 3128,
            username: "user\nextra".into(),
            password: "secret\r\nmore".into(),
        });

        params.normalize_hosts(&mut rand::thread_rng());

        let proxy = params.openvpn.proxy.unwrap();
        assert_eq!(proxy.username, "user");
        assert_eq!(proxy.password, "secret");
    }

    #[test]
    fn test_validate() {
        let mut params = ConnectionParams::wireguard();
        assert!(params.validate().is_err());

        params.wireguard.entry_hosts = vec![wg_host(1)];
        assert!(params.validate().is_ok());

        params.wireguard.entry_hosts[0].public_key = "not base64!".into();
        assert!(matches!(params.validate(), Err(Error::InvalidParams(_))));

        let openvpn = ConnectionParams::openvpn();
        assert!(openvpn.validate().is_err());
    }

    #[test]
    fn test_deserialize_defaults() {
        let params: ConnectionParams = serde_json::from_str(r#"{"vpn_type":"openvpn"}"#).unwrap();
        assert_eq!(params.openvpn.port, 2049);
        assert!(params.manual_dns.is_empty());
        assert!(!params.anti_tracker.enabled);
        assert!(!params.firewall_on);
    }

    #[test]
    fn test_multihop() {
        let mut params = ConnectionParams::openvpn();
        assert!(!params.is_multihop());

        params.openvpn.exit_server_id = "de1".into();
        assert!(params.is_multihop());

        // сервер выхода есть только у OpenVPN
        params.vpn_type = VpnType::WireGuard;
        assert!(!params.is_multihop());
    }
}
