//! WireGuard через wg-quick
//!
//! Этот модуль отвечает за:
//! - Генерацию конфигурации wg-quick (только проверенные base64 ключи)
//! - Поднятие и остановку интерфейса
//! - DNS туннеля (адрес сервера в туннеле или пользовательский DNS)
//! - Паузу: интерфейс опускается, `connect` ждёт снятия с паузы

use async_trait::async_trait;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vpnd_core::keys::validate_key;
use vpnd_core::{DnsSettings, Error, Process, Result, StateInfo, VpnState, VpnType, WireGuardHost};
use vpnd_service::{Dns, WireGuardCredentials};

use crate::shell;

/// Интервал проверки наличия интерфейса
const INTERFACE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Настройки WireGuard процесса
#[derive(Debug, Clone)]
pub struct WireGuardSettings {
    /// Путь к wg-quick
    pub wg_quick: PathBuf,
    /// Файл конфигурации (имя файла без расширения = имя интерфейса)
    pub config_path: PathBuf,
    /// Сервер
    pub host: WireGuardHost,
    /// Порт сервера
    pub port: u16,
    /// MTU (0 - по умолчанию)
    pub mtu: u16,
}

/// VPN процесс WireGuard
pub struct WireGuardProcess {
    settings: WireGuardSettings,
    credentials: WireGuardCredentials,
    dns: Arc<Dns>,
    interface: String,

    manual_dns: Mutex<DnsSettings>,
    running: AtomicBool,
    /// Интерфейс поднят через wg-quick и ещё не опущен
    interface_up: AtomicBool,
    paused: AtomicBool,
    listen_port: AtomicU16,
    stop: CancellationToken,
    resume: Notify,
}

impl WireGuardProcess {
    /// Создать процесс
    pub fn new(
        settings: WireGuardSettings,
        credentials: WireGuardCredentials,
        dns: Arc<Dns>,
    ) -> Result<Self> {
        if credentials.private_key.is_empty() {
            return Err(Error::InvalidParams(
                "локальные учётные данные WireGuard не заданы".into(),
            ));
        }
        let interface = interface_name(&settings.config_path)?;

        Ok(Self {
            settings,
            credentials,
            dns,
            interface,
            manual_dns: Mutex::new(DnsSettings::default()),
            running: AtomicBool::new(false),
            interface_up: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            listen_port: AtomicU16::new(0),
            stop: CancellationToken::new(),
            resume: Notify::new(),
        })
    }

    /// Имя интерфейса
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Текст конфигурации wg-quick
    pub fn generate_config(&self, listen_port: u16) -> Result<String> {
        // в файл попадают только base64 ключи, никаких пользовательских строк
        validate_key(&self.settings.host.public_key).map_err(|_| {
            Error::InvalidParams("публичный ключ WireGuard не является base64 строкой".into())
        })?;
        validate_key(&self.credentials.private_key).map_err(|_| {
            Error::InvalidParams("приватный ключ WireGuard не является base64 строкой".into())
        })?;
        let preshared = self.credentials.preshared_key.trim();
        if !preshared.is_empty() {
            validate_key(preshared).map_err(|_| {
                Error::InvalidParams("preshared ключ WireGuard не является base64 строкой".into())
            })?;
        }

        let mut lines = vec![
            "[Interface]".to_string(),
            format!("PrivateKey = {}", self.credentials.private_key.trim()),
            format!("ListenPort = {}", listen_port),
            format!("Address = {}/32", self.credentials.local_ip),
        ];
        if self.settings.mtu > 0 {
            lines.push(format!("MTU = {}", self.settings.mtu));
        }

        lines.push(String::new());
        lines.push("[Peer]".to_string());
        lines.push(format!("PublicKey = {}", self.settings.host.public_key.trim()));
        if !preshared.is_empty() {
            lines.push(format!("PresharedKey = {}", preshared));
        }
        lines.push(format!(
            "Endpoint = {}",
            std::net::SocketAddr::new(self.settings.host.host, self.settings.port)
        ));
        lines.push("PersistentKeepalive = 25".to_string());
        lines.push("AllowedIPs = 0.0.0.0/0".to_string());

        Ok(lines.join("\n") + "\n")
    }

    async fn save_config(&self) -> Result<()> {
        let port = free_udp_port().await?;
        self.listen_port.store(port, Ordering::SeqCst);

        let config = self.generate_config(port)?;
        tokio::fs::write(&self.settings.config_path, &config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&self.settings.config_path, perms).await?;
        }

        info!(
            "Конфигурация WireGuard:\n{}",
            config.replace(self.credentials.private_key.trim(), "***")
        );
        Ok(())
    }

    fn default_dns_settings(&self) -> DnsSettings {
        DnsSettings::from_ip(self.settings.host.local_ip)
    }

    fn current_manual_dns(&self) -> DnsSettings {
        self.manual_dns
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    fn store_manual_dns(&self, dns: DnsSettings) {
        if let Ok(mut manual) = self.manual_dns.lock() {
            *manual = dns;
        }
    }

    /// Интерфейс поднят: DNS, уведомление, ожидание остановки
    async fn run_interface(&self, state_tx: &mpsc::Sender<StateInfo>) -> Result<()> {
        if self.stop.is_cancelled() {
            return Ok(());
        }

        let manual = self.current_manual_dns();
        let dns = if manual.is_empty() {
            self.default_dns_settings()
        } else {
            manual
        };
        self.dns.set_manual(&dns, None).await?;

        let local_ip = self.credentials.local_ip;
        let initialised = StateInfo::new(VpnType::WireGuard, VpnState::Initialised, "")
            .with_client_ip(local_ip);
        let mut connected = StateInfo::new(VpnType::WireGuard, VpnState::Connected, "")
            .with_client_ip(local_ip)
            .with_server(self.settings.host.host, self.settings.port, false);
        connected.client_port = self.listen_port.load(Ordering::SeqCst);
        connected.is_can_pause = true;
        let _ = state_tx.send(initialised).await;
        let _ = state_tx.send(connected).await;

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(INTERFACE_POLL_INTERVAL) => {
                    if !interface_exists(&self.interface).await {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn connect_loop(&self, state_tx: &mpsc::Sender<StateInfo>) -> Result<()> {
        loop {
            // disconnect мог прийти до запуска
            if self.stop.is_cancelled() {
                info!("Отключение запрошено, интерфейс WireGuard не поднимается");
                return Ok(());
            }

            self.save_config().await?;
            let args = [Path::new("up"), self.settings.config_path.as_path()];
            shell::exec(&self.settings.wg_quick, &args)
                .await
                .map_err(|e| Error::Process(format!("не удалось запустить WireGuard: {}", e)))?;
            self.interface_up.store(true, Ordering::SeqCst);

            let result = self.run_interface(state_tx).await;

            if let Err(e) = self.dns.delete_manual(None).await {
                warn!("Не удалось восстановить DNS: {}", e);
            }
            if result.is_err() || self.stop.is_cancelled() {
                if let Err(down) = self.interface_down().await {
                    warn!("{}", down);
                }
            }
            result?;

            if !self.is_paused() || self.stop.is_cancelled() {
                return Ok(());
            }

            info!("Пауза");
            tokio::select! {
                _ = self.stop.cancelled() => return Ok(()),
                _ = self.resume.notified() => info!("Возобновление..."),
            }
            if self.stop.is_cancelled() {
                return Ok(());
            }
        }
    }

    /// Опустить интерфейс, если он поднят
    async fn interface_down(&self) -> Result<()> {
        if !self.interface_up.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let args = [Path::new("down"), self.settings.config_path.as_path()];
        shell::exec(&self.settings.wg_quick, &args)
            .await
            .map(|_| ())
            .map_err(|e| Error::Process(format!("не удалось остановить WireGuard: {}", e)))
    }
}

#[async_trait]
impl Process for WireGuardProcess {
    fn vpn_type(&self) -> VpnType {
        VpnType::WireGuard
    }

    async fn init(&self) -> Result<()> {
        // интерфейс мог остаться после аварийного завершения демона
        if interface_exists(&self.interface).await {
            info!(
                "Остановка интерфейса WireGuard '{}' перед новым подключением...",
                self.interface
            );
            let name = self.interface.as_str();
            if let Err(e) = shell::exec("ip", &["link", "set", "down", name]).await {
                warn!("{}", e);
            }
            if let Err(e) = shell::exec("ip", &["link", "delete", name]).await {
                warn!("{}", e);
            }
        }
        Ok(())
    }

    async fn connect(&self, state_tx: mpsc::Sender<StateInfo>) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let result = self.connect_loop(&state_tx).await;
        self.running.store(false, Ordering::SeqCst);
        self.interface_up.store(false, Ordering::SeqCst);

        if let Err(e) = tokio::fs::remove_file(&self.settings.config_path).await {
            warn!("Не удалось удалить конфигурацию WireGuard: {}", e);
        }
        result
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop.cancel();
        if self.is_paused() {
            // интерфейс уже опущен
            return self.resume().await;
        }
        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.interface_down().await
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn pause(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.paused.store(true, Ordering::SeqCst);
        self.interface_down().await
    }

    async fn resume(&self) -> Result<()> {
        if !self.is_paused() || !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.paused.store(false, Ordering::SeqCst);
        self.resume.notify_one();
        Ok(())
    }

    async fn set_manual_dns(&self, dns: &DnsSettings) -> Result<()> {
        self.store_manual_dns(dns.clone());
        if self.is_paused() || !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.dns.set_manual(dns, None).await
    }

    async fn reset_manual_dns(&self) -> Result<()> {
        self.store_manual_dns(DnsSettings::default());
        if self.is_paused() {
            return Ok(());
        }
        if self.running.load(Ordering::SeqCst) {
            return self.dns.set_manual(&self.default_dns_settings(), None).await;
        }
        self.dns.delete_manual(None).await
    }

    fn destination_ip(&self) -> IpAddr {
        self.settings.host.host
    }

    fn is_ipv6_in_tunnel(&self) -> bool {
        false
    }

    async fn on_routing_changed(&self) -> Result<()> {
        Ok(())
    }

    fn default_dns(&self) -> Option<IpAddr> {
        Some(self.settings.host.local_ip)
    }
}

/// Имя интерфейса из пути к конфигурации (`/etc/vpnd/wgvpn.conf` -> `wgvpn`)
fn interface_name(config_path: &Path) -> Result<String> {
    config_path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::InvalidParams(format!(
                "некорректный путь конфигурации WireGuard: {}",
                config_path.display()
            ))
        })
}

async fn interface_exists(name: &str) -> bool {
    tokio::fs::metadata(Path::new("/sys/class/net").join(name))
        .await
        .is_ok()
}

async fn free_udp_port() -> Result<u16> {
    let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
    Ok(socket.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolvconf::ResolvConfDns;
    use rand::rngs::OsRng;
    use vpnd_core::WireGuardKeyPair;

    fn settings(dir: &Path, wg_quick: PathBuf) -> WireGuardSettings {
        WireGuardSettings {
            wg_quick,
            config_path: dir.join("vpndtest0.conf"),
            host: WireGuardHost {
                hostname: "nl1".into(),
                host: "198.51.100.7".parse().unwrap(),
                public_key: WireGuardKeyPair::generate(&mut OsRng).public_key().to_string(),
                local_ip: "172.16.0.1".parse().unwrap(),
            },
            port: 2049,
            mtu: 1380,
        }
    }

    fn credentials() -> WireGuardCredentials {
        WireGuardCredentials {
            private_key: WireGuardKeyPair::generate(&mut OsRng).private_key().to_string(),
            preshared_key: String::new(),
            local_ip: "172.16.0.2".parse().unwrap(),
        }
    }

    fn dns(dir: &Path) -> Arc<Dns> {
        let path = dir.join("resolv.conf");
        std::fs::write(&path, "nameserver 192.168.1.1\n").unwrap();
        Arc::new(Dns::new(Arc::new(ResolvConfDns::new(path))))
    }

    #[test]
    fn test_interface_name() {
        assert_eq!(interface_name(Path::new("/etc/vpnd/wgvpn.conf")).unwrap(), "wgvpn");
        assert!(interface_name(Path::new("/")).is_err());
    }

    #[test]
    fn test_generate_config() {
        let dir = tempfile::tempdir().unwrap();
        let creds = credentials();
        let process = WireGuardProcess::new(
            settings(dir.path(), PathBuf::from("wg-quick")),
            creds.clone(),
            dns(dir.path()),
        )
        .unwrap();

        let config = process.generate_config(51820).unwrap();
        assert!(config.starts_with("[Interface]\n"));
        assert!(config.contains(&format!("PrivateKey = {}", creds.private_key)));
        assert!(config.contains("ListenPort = 51820"));
        assert!(config.contains("Address = 172.16.0.2/32"));
        assert!(config.contains("MTU = 1380"));
        assert!(config.contains("Endpoint = 198.51.100.7:2049"));
        assert!(config.contains("AllowedIPs = 0.0.0.0/0"));
        assert!(!config.contains("PresharedKey"));
        assert_eq!(process.interface(), "vpndtest0");
    }

    #[test]
    fn test_config_rejects_injected_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path(), PathBuf::from("wg-quick"));
        settings.host.public_key = format!("{}\nPostUp = id", settings.host.public_key);

        let process = WireGuardProcess::new(settings, credentials(), dns(dir.path())).unwrap();
        assert!(matches!(
            process.generate_config(51820),
            Err(Error::InvalidParams(_))
        ));
    }

    #[test]
    fn test_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let mut creds = credentials();
        creds.private_key.clear();
        assert!(WireGuardProcess::new(
            settings(dir.path(), PathBuf::from("wg-quick")),
            creds,
            dns(dir.path())
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_dns_changes_before_connect_are_stored() {
        let dir = tempfile::tempdir().unwrap();
        let process = WireGuardProcess::new(
            settings(dir.path(), PathBuf::from("wg-quick")),
            credentials(),
            dns(dir.path()),
        )
        .unwrap();

        process
            .set_manual_dns(&DnsSettings::from_ip("1.1.1.1".parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(process.current_manual_dns().dns_host, "1.1.1.1");

        // не подключён: resolv.conf не меняется
        let resolv = std::fs::read_to_string(dir.path().join("resolv.conf")).unwrap();
        assert_eq!(resolv, "nameserver 192.168.1.1\n");

        // пауза и disconnect без подключения ничего не делают
        process.pause().await.unwrap();
        assert!(!process.is_paused());
        process.disconnect().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_with_fake_wg_quick() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("wg-quick");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let settings = settings(dir.path(), script);
        let config_path = settings.config_path.clone();
        let process = WireGuardProcess::new(settings, credentials(), dns(dir.path())).unwrap();

        // интерфейс не появился: connect отправляет состояния и завершается
        let (tx, mut rx) = mpsc::channel(8);
        process.connect(tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.state, VpnState::Initialised);
        assert_eq!(first.client_ip, Some("172.16.0.2".parse().unwrap()));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.state, VpnState::Connected);
        assert_eq!(second.server_ip, Some("198.51.100.7".parse().unwrap()));
        assert!(second.is_can_pause);

        assert!(!config_path.exists());
        let resolv = std::fs::read_to_string(dir.path().join("resolv.conf")).unwrap();
        assert_eq!(resolv, "nameserver 192.168.1.1\n");
    }

    /// wg-quick, записывающий свои команды в журнал (`up` выполняется `up_secs` секунд)
    #[cfg(unix)]
    fn logging_wg_quick(dir: &Path, up_secs: u32) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("wg-quick.log");
        let script = dir.join("wg-quick");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$1\" >> {}\nif [ \"$1\" = up ]; then sleep {}; fi\nexit 0\n",
                log.display(),
                up_secs
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script, log)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_disconnect_before_connect_keeps_interface_down() {
        let dir = tempfile::tempdir().unwrap();
        let (script, log) = logging_wg_quick(dir.path(), 0);
        let settings = settings(dir.path(), script);
        let config_path = settings.config_path.clone();
        let process = WireGuardProcess::new(settings, credentials(), dns(dir.path())).unwrap();

        process.disconnect().await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        process.connect(tx).await.unwrap();

        assert!(!log.exists());
        assert!(!config_path.exists());
        assert!(rx.try_recv().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_disconnect_while_interface_comes_up() {
        let dir = tempfile::tempdir().unwrap();
        let (script, log) = logging_wg_quick(dir.path(), 1);
        let process =
            WireGuardProcess::new(settings(dir.path(), script), credentials(), dns(dir.path()))
                .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let (connected, disconnected) = tokio::join!(process.connect(tx), async {
            // wg-quick up уже запущен
            for _ in 0..250 {
                if log.exists() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            process.disconnect().await
        });
        connected.unwrap();
        disconnected.unwrap();

        // интерфейс поднялся после disconnect и был опущен
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "up\ndown\n");
        assert!(rx.try_recv().is_err());
    }
}
