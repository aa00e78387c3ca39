//! Конфигурация демона vpnd
//!
//! Этот модуль отвечает за загрузку и валидацию конфигурации демона
//! и построение параметров подключения из неё.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vpnd_core::{
    AntiTrackerMetadata, ConnectionParams, DnsSettings, OpenVpnHost, ProxyParams, VpnType,
    WireGuardHost,
};
use vpnd_service::{AntiTrackerDns, AntiTrackerServers};

/// Конфигурация демона
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Параметры подключения
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Начальные данные сессии (если настроек ещё нет)
    #[serde(default)]
    pub session: SessionConfig,

    /// Настройки kill switch
    #[serde(default)]
    pub firewall: FirewallConfig,

    /// Настройки split tunnel
    #[serde(default)]
    pub split_tunnel: SplitTunnelSection,

    /// Адреса DNS серверов AntiTracker
    #[serde(default)]
    pub anti_tracker: AntiTrackerServers,

    /// Пути к программам и файлам
    #[serde(default)]
    pub paths: PathsConfig,

    /// Детектор изменений маршрутизации
    #[serde(default)]
    pub route_detector: RouteDetectorConfig,

    /// Настройки WireGuard
    #[serde(default)]
    pub wireguard: WireGuardConfig,

    /// Настройки логирования
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Параметры подключения
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Протокол (wireguard, openvpn)
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Серверы WireGuard
    #[serde(default)]
    pub wireguard_hosts: Vec<WireGuardHost>,

    /// Порт WireGuard
    #[serde(default = "default_port")]
    pub wireguard_port: u16,

    /// Серверы OpenVPN
    #[serde(default)]
    pub openvpn_hosts: Vec<OpenVpnHost>,

    /// Порт OpenVPN
    #[serde(default = "default_port")]
    pub openvpn_port: u16,

    /// OpenVPN через TCP
    #[serde(default)]
    pub openvpn_tcp: bool,

    /// Прокси для OpenVPN
    #[serde(default)]
    pub proxy: Option<ProxyParams>,

    /// Пользовательский DNS
    #[serde(default)]
    pub manual_dns: Option<IpAddr>,

    /// AntiTracker (заменяет пользовательский DNS)
    #[serde(default)]
    pub anti_tracker: bool,

    /// AntiTracker в режиме hardcore
    #[serde(default)]
    pub anti_tracker_hardcore: bool,

    /// Включить firewall перед подключением и оставить включённым
    #[serde(default)]
    pub firewall_on: bool,

    /// Включить firewall только на время подключения
    #[serde(default = "default_true")]
    pub firewall_on_during_connection: bool,
}

/// Начальные данные сессии
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Токен сессии
    #[serde(default)]
    pub token: String,

    /// Имя пользователя OpenVPN
    #[serde(default)]
    pub openvpn_user: String,

    /// Пароль OpenVPN
    #[serde(default)]
    pub openvpn_pass: String,

    /// Приватный ключ WireGuard (base64)
    #[serde(default)]
    pub wg_private_key: String,

    /// Адрес клиента в туннеле WireGuard
    #[serde(default)]
    pub wg_local_ip: String,
}

/// Настройки kill switch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallConfig {
    /// Firewall включён постоянно
    #[serde(default)]
    pub persistent: bool,

    /// Пропускать локальную сеть
    #[serde(default)]
    pub allow_lan: bool,

    /// Пропускать multicast
    #[serde(default)]
    pub allow_lan_multicast: bool,

    /// Пропускать API серверы
    #[serde(default = "default_true")]
    pub allow_api_servers: bool,
}

/// Настройки split tunnel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitTunnelSection {
    /// Включён
    #[serde(default)]
    pub enabled: bool,

    /// Инверсный режим
    #[serde(default)]
    pub inverse: bool,
}

/// Пути к программам и файлам
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// wg-quick
    #[serde(default = "default_wg_quick")]
    pub wg_quick: PathBuf,

    /// Конфигурация WireGuard (имя файла = имя интерфейса)
    #[serde(default = "default_wg_config")]
    pub wg_config: PathBuf,

    /// openvpn
    #[serde(default = "default_openvpn")]
    pub openvpn: PathBuf,

    /// Конфигурация OpenVPN
    #[serde(default = "default_openvpn_config")]
    pub openvpn_config: PathBuf,

    /// Дополнительные директивы OpenVPN (сертификаты, tls-auth)
    #[serde(default)]
    pub openvpn_extra_config: Option<PathBuf>,

    /// resolv.conf
    #[serde(default = "default_resolv_conf")]
    pub resolv_conf: PathBuf,

    /// Файл настроек (JSON)
    #[serde(default = "default_preferences")]
    pub preferences: PathBuf,
}

/// Детектор изменений маршрутизации
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDetectorConfig {
    /// Интервал опроса таблицы маршрутизации (миллисекунды)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Настройки WireGuard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireGuardConfig {
    /// Интервал смены ключей (часы)
    #[serde(default = "default_rotation_hours")]
    pub key_rotation_hours: u64,

    /// MTU (0 - по умолчанию)
    #[serde(default)]
    pub mtu: u16,
}

/// Настройки логирования
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Уровень логирования (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Логировать в файл
    #[serde(default)]
    pub log_to_file: bool,

    /// Путь к файлу логов
    #[serde(default = "default_log_file_path")]
    pub log_file_path: String,
}

// Значения по умолчанию
fn default_protocol() -> String {
    "wireguard".to_string()
}

fn default_port() -> u16 {
    2049
}

fn default_true() -> bool {
    true
}

fn default_wg_quick() -> PathBuf {
    PathBuf::from("/usr/bin/wg-quick")
}

fn default_wg_config() -> PathBuf {
    PathBuf::from("/etc/vpnd/wgvpn.conf")
}

fn default_openvpn() -> PathBuf {
    PathBuf::from("/usr/sbin/openvpn")
}

fn default_openvpn_config() -> PathBuf {
    PathBuf::from("/etc/vpnd/openvpn.conf")
}

fn default_resolv_conf() -> PathBuf {
    PathBuf::from("/etc/resolv.conf")
}

fn default_preferences() -> PathBuf {
    PathBuf::from("/etc/vpnd/preferences.json")
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_rotation_hours() -> u64 {
    7 * 24
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file_path() -> String {
    "/var/log/vpnd.log".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            wireguard_hosts: Vec::new(),
            wireguard_port: default_port(),
            openvpn_hosts: Vec::new(),
            openvpn_port: default_port(),
            openvpn_tcp: false,
            proxy: None,
            manual_dns: None,
            anti_tracker: false,
            anti_tracker_hardcore: false,
            firewall_on: false,
            firewall_on_during_connection: true,
        }
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            persistent: false,
            allow_lan: false,
            allow_lan_multicast: false,
            allow_api_servers: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            wg_quick: default_wg_quick(),
            wg_config: default_wg_config(),
            openvpn: default_openvpn(),
            openvpn_config: default_openvpn_config(),
            openvpn_extra_config: None,
            resolv_conf: default_resolv_conf(),
            preferences: default_preferences(),
        }
    }
}

impl Default for RouteDetectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for WireGuardConfig {
    fn default() -> Self {
        Self {
            key_rotation_hours: default_rotation_hours(),
            mtu: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_to_file: false,
            log_file_path: default_log_file_path(),
        }
    }
}

impl DaemonConfig {
    /// Загрузить конфигурацию из TOML файла
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Сохранить конфигурацию в TOML файл
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), anyhow::Error> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Валидация конфигурации
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.vpn_type()?;

        if self.connection.wireguard_port == 0 || self.connection.openvpn_port == 0 {
            anyhow::bail!("Порт сервера не может быть 0");
        }

        if let Some(proxy) = &self.connection.proxy {
            if proxy.port == 0 {
                anyhow::bail!("Порт прокси не может быть 0");
            }
        }

        if self.route_detector.poll_interval_ms < 100 {
            anyhow::bail!("Интервал опроса маршрутов должен быть не меньше 100 мс");
        }

        if self.wireguard.key_rotation_hours == 0 {
            anyhow::bail!("Интервал смены ключей WireGuard не может быть 0");
        }

        if self.wireguard.mtu != 0 && (self.wireguard.mtu < 576 || self.wireguard.mtu > 9000) {
            anyhow::bail!("MTU должен быть в диапазоне 576-9000");
        }

        if self.connection.anti_tracker {
            self.anti_tracker
                .resolve(self.connection.anti_tracker_hardcore, false)
                .map_err(|e| anyhow::anyhow!("AntiTracker включён: {}", e))?;
        }

        Ok(())
    }

    /// Протокол подключения
    pub fn vpn_type(&self) -> Result<VpnType, anyhow::Error> {
        match self.connection.protocol.as_str() {
            "wireguard" | "wg" => Ok(VpnType::WireGuard),
            "openvpn" | "ovpn" => Ok(VpnType::OpenVpn),
            unknown => anyhow::bail!("Неизвестный протокол: {}", unknown),
        }
    }

    /// Параметры подключения
    pub fn connection_params(&self) -> Result<ConnectionParams, anyhow::Error> {
        let mut params = match self.vpn_type()? {
            VpnType::WireGuard => ConnectionParams::wireguard(),
            VpnType::OpenVpn => ConnectionParams::openvpn(),
        };

        let conn = &self.connection;
        params.firewall_on = conn.firewall_on;
        params.firewall_on_during_connection = conn.firewall_on_during_connection;
        if let Some(dns) = conn.manual_dns {
            params.manual_dns = DnsSettings::from_ip(dns);
        }
        params.anti_tracker = AntiTrackerMetadata {
            enabled: conn.anti_tracker,
            hardcore: conn.anti_tracker_hardcore,
        };

        params.wireguard.entry_hosts = conn.wireguard_hosts.clone();
        params.wireguard.port = conn.wireguard_port;
        params.wireguard.mtu = self.wireguard.mtu;

        params.openvpn.entry_hosts = conn.openvpn_hosts.clone();
        params.openvpn.port = conn.openvpn_port;
        params.openvpn.is_tcp = conn.openvpn_tcp;
        params.openvpn.proxy = conn.proxy.clone();

        Ok(params)
    }

    /// Интервал опроса маршрутов
    pub fn route_poll_interval(&self) -> Duration {
        Duration::from_millis(self.route_detector.poll_interval_ms)
    }

    /// Интервал смены ключей WireGuard
    pub fn key_rotation_interval(&self) -> Duration {
        Duration::from_secs(self.wireguard.key_rotation_hours * 60 * 60)
    }

    /// Пример конфигурации для `generate-config`
    pub fn example() -> Self {
        let mut config = Self::default();
        config.connection.wireguard_hosts = vec![WireGuardHost {
            hostname: "nl1.wg.example.com".into(),
            host: IpAddr::from([198, 51, 100, 7]),
            public_key: "jLQDKbqnEcWfs2RTE2bqmg5gqNo2ZjpO8YNF+2OMfUI=".into(),
            local_ip: IpAddr::from([172, 16, 0, 1]),
        }];
        config.connection.openvpn_hosts = vec![OpenVpnHost {
            hostname: "nl1.gw.example.com".into(),
            host: IpAddr::from([198, 51, 100, 8]),
        }];
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.connection.protocol, "wireguard");
        assert!(config.connection.firewall_on_during_connection);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = DaemonConfig::default();

        config.connection.protocol = "pptp".to_string();
        assert!(config.validate().is_err());
        config.connection.protocol = "openvpn".to_string();
        assert!(config.validate().is_ok());

        config.connection.openvpn_port = 0;
        assert!(config.validate().is_err());
        config.connection.openvpn_port = 443;

        config.route_detector.poll_interval_ms = 10;
        assert!(config.validate().is_err());
        config.route_detector.poll_interval_ms = 1000;

        config.wireguard.mtu = 100;
        assert!(config.validate().is_err());
        config.wireguard.mtu = 0;

        config.connection.anti_tracker = true;
        assert!(config.validate().is_err());
        config.anti_tracker.default.ip = Some("10.0.254.2".parse().unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_connection_params() {
        let mut config = DaemonConfig::example();
        config.connection.manual_dns = Some("1.1.1.1".parse().unwrap());

        let params = config.connection_params().unwrap();
        assert_eq!(params.vpn_type, VpnType::WireGuard);
        assert_eq!(params.manual_dns.dns_host, "1.1.1.1");
        assert!(!params.anti_tracker.enabled);
        assert!(params.firewall_on_during_connection);
        assert_eq!(params.wireguard.entry_hosts.len(), 1);
        assert!(params.validate().is_ok());

        config.connection.protocol = "openvpn".to_string();
        let params = config.connection_params().unwrap();
        assert_eq!(params.vpn_type, VpnType::OpenVpn);
        assert_eq!(params.destination_ip(), Some("198.51.100.8".parse().unwrap()));
    }

    #[test]
    fn test_anti_tracker_section() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [connection]
            anti_tracker = true
            anti_tracker_hardcore = true

            [anti_tracker.hardcore]
            ip = "10.0.254.3"
            "#,
        )
        .unwrap();

        let params = config.connection_params().unwrap();
        assert!(params.anti_tracker.enabled);
        assert!(params.anti_tracker.hardcore);
        assert_eq!(
            config.anti_tracker.hardcore.ip,
            Some("10.0.254.3".parse().unwrap())
        );
        assert!(config.anti_tracker.default.ip.is_none());
    }

    #[test]
    fn test_toml_serialization() {
        let config = DaemonConfig::example();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("wireguard_hosts"));
        assert!(toml_str.contains("poll_interval_ms"));

        let deserialized: DaemonConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(
            deserialized.connection.wireguard_hosts,
            config.connection.wireguard_hosts
        );
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vpnd.toml");

        DaemonConfig::example().to_file(&path).unwrap();
        let loaded = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(loaded.paths.wg_quick, PathBuf::from("/usr/bin/wg-quick"));
        assert_eq!(loaded.key_rotation_interval(), Duration::from_secs(7 * 24 * 3600));
    }
}
