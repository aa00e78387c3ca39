//! OpenVPN процесс
//!
//! Этот модуль отвечает за:
//! - Генерацию конфигурации (сервер, протокол, прокси, файл учётных данных)
//! - Запуск `openvpn` и разбор его вывода в состояния подключения
//! - DNS, полученный от сервера (PUSH_REPLY), или пользовательский DNS

use async_trait::async_trait;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vpnd_core::{
    DnsSettings, Error, OpenVpnHost, Process, ProxyParams, Result, StateInfo, VpnState, VpnType,
};
use vpnd_service::Dns;

/// Настройки OpenVPN процесса
#[derive(Debug, Clone)]
pub struct OpenVpnSettings {
    /// Путь к openvpn
    pub binary: PathBuf,
    /// Файл конфигурации
    pub config_path: PathBuf,
    /// Дополнительные директивы (сертификаты и т.п.), добавляются в конец конфигурации
    pub extra_config: Option<PathBuf>,
    /// Сервер
    pub host: OpenVpnHost,
    /// Порт сервера
    pub port: u16,
    /// TCP вместо UDP
    pub is_tcp: bool,
    /// Прокси
    pub proxy: Option<ProxyParams>,
    /// Идентификатор выходного сервера (multihop)
    pub exit_server_id: String,
}

/// Событие из вывода OpenVPN
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// Смена состояния
    State(VpnState),
    /// Назначен адрес в туннеле
    AssignedIp(IpAddr),
    /// DNS сервер от сервера
    PushedDns(IpAddr),
    /// Ошибка аутентификации
    AuthFailed,
}

/// Разбор строки вывода OpenVPN
pub fn parse_log_line(line: &str) -> Option<LogEvent> {
    if line.contains("AUTH_FAILED") {
        return Some(LogEvent::AuthFailed);
    }
    if line.contains("Initialization Sequence Completed") {
        return Some(LogEvent::State(VpnState::Connected));
    }
    if line.contains("SIGUSR1") || line.contains("Restart pause") {
        return Some(LogEvent::State(VpnState::Reconnecting));
    }
    if line.contains("PUSH_REPLY") {
        if let Some(dns) = parse_pushed_dns(line) {
            return Some(LogEvent::PushedDns(dns));
        }
        return Some(LogEvent::State(VpnState::GetConfig));
    }
    if let Some(ip) = parse_assigned_ip(line) {
        return Some(LogEvent::AssignedIp(ip));
    }
    if line.contains("Attempting to establish TCP connection") {
        return Some(LogEvent::State(VpnState::TcpConnect));
    }
    if line.contains("UDP link remote") || line.contains("TCP connection established") {
        return Some(LogEvent::State(VpnState::Wait));
    }
    if line.contains("TLS: Initial packet") {
        return Some(LogEvent::State(VpnState::Auth));
    }
    if line.contains("SENT CONTROL") && line.contains("PUSH_REQUEST") {
        return Some(LogEvent::State(VpnState::GetConfig));
    }
    None
}

/// `dhcp-option DNS 10.0.0.1` в PUSH_REPLY
fn parse_pushed_dns(line: &str) -> Option<IpAddr> {
    line.split(',')
        .filter_map(|opt| opt.trim().strip_prefix("dhcp-option DNS "))
        .find_map(|ip| ip.trim_end_matches('\'').trim().parse().ok())
}

/// `net_addr_v4_add: 10.8.0.2/24 dev tun0` или `ip addr add dev tun0 10.8.0.2/24`
fn parse_assigned_ip(line: &str) -> Option<IpAddr> {
    let rest = if let Some(pos) = line.find("net_addr_v4_add:") {
        &line[pos + "net_addr_v4_add:".len()..]
    } else if let Some(pos) = line.find("addr add") {
        &line[pos + "addr add".len()..]
    } else {
        return None;
    };
    rest.split_whitespace()
        .filter_map(|token| token.split('/').next())
        .find_map(|token| token.parse().ok())
}

/// VPN процесс OpenVPN
pub struct OpenVpnProcess {
    settings: OpenVpnSettings,
    username: String,
    password: String,
    dns: Arc<Dns>,

    manual_dns: Mutex<DnsSettings>,
    pushed_dns: Mutex<Option<IpAddr>>,
    connected: AtomicBool,
    stop: CancellationToken,
}

impl OpenVpnProcess {
    /// Создать процесс
    pub fn new(
        settings: OpenVpnSettings,
        username: String,
        password: String,
        dns: Arc<Dns>,
    ) -> Result<Self> {
        if username.is_empty() {
            return Err(Error::InvalidParams("учётные данные OpenVPN не заданы".into()));
        }
        // multihop: выходной сервер передаётся через имя пользователя
        let username = if settings.exit_server_id.is_empty() {
            username
        } else {
            format!("{}@{}", username, settings.exit_server_id)
        };

        Ok(Self {
            settings,
            username,
            password,
            dns,
            manual_dns: Mutex::new(DnsSettings::default()),
            pushed_dns: Mutex::new(None),
            connected: AtomicBool::new(false),
            stop: CancellationToken::new(),
        })
    }

    fn auth_file(&self) -> PathBuf {
        self.settings.config_path.with_extension("auth")
    }

    fn proxy_auth_file(&self) -> PathBuf {
        self.settings.config_path.with_extension("proxy-auth")
    }

    /// Текст конфигурации
    pub fn generate_config(&self, extra: &str) -> String {
        let proto = if self.settings.is_tcp { "tcp-client" } else { "udp" };
        let mut lines = vec![
            "client".to_string(),
            "dev tun".to_string(),
            "nobind".to_string(),
            format!("proto {}", proto),
            format!("remote {} {}", self.settings.host.host, self.settings.port),
            format!("auth-user-pass {}", quote(&self.auth_file())),
            "auth-nocache".to_string(),
            "hand-window 6".to_string(),
            "keepalive 8 30".to_string(),
            "verb 3".to_string(),
        ];

        if let Some(proxy) = &self.settings.proxy {
            let auth = if !proxy.username.is_empty() && !proxy.password.is_empty() {
                format!(" {}", quote(&self.proxy_auth_file()))
            } else {
                String::new()
            };
            let directive = proxy.proxy_type.directive();
            lines.push(format!("{}-retry", directive));
            lines.push(format!(
                "{} {} {}{}",
                directive, proxy.address, proxy.port, auth
            ));
        }

        let mut config = lines.join("\n");
        if !extra.trim().is_empty() {
            config.push('\n');
            config.push_str(extra.trim_end());
        }
        config.push('\n');
        config
    }

    async fn write_files(&self) -> Result<()> {
        let extra = match &self.settings.extra_config {
            Some(path) => tokio::fs::read_to_string(path).await?,
            None => String::new(),
        };
        let config = self.generate_config(&extra);

        write_private(&self.settings.config_path, &config).await?;
        write_private(
            &self.auth_file(),
            &format!("{}\n{}\n", self.username, self.password),
        )
        .await?;
        if let Some(proxy) = &self.settings.proxy {
            if !proxy.username.is_empty() && !proxy.password.is_empty() {
                write_private(
                    &self.proxy_auth_file(),
                    &format!("{}\n{}\n", proxy.username, proxy.password),
                )
                .await?;
            }
        }

        info!("Конфигурация OpenVPN:\n{}", config);
        Ok(())
    }

    async fn remove_files(&self) {
        for path in [
            self.settings.config_path.clone(),
            self.auth_file(),
            self.proxy_auth_file(),
        ] {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Не удалось удалить {}: {}", path.display(), e);
                }
            }
        }
    }

    fn current_manual_dns(&self) -> DnsSettings {
        self.manual_dns
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    fn pushed_dns(&self) -> Option<IpAddr> {
        self.pushed_dns.lock().ok().and_then(|d| *d)
    }

    fn state(&self, state: VpnState) -> StateInfo {
        StateInfo::new(VpnType::OpenVpn, state, "")
    }

    async fn apply_dns(&self) -> Result<()> {
        let manual = self.current_manual_dns();
        if !manual.is_empty() {
            return self.dns.set_manual(&manual, None).await;
        }
        if let Some(ip) = self.pushed_dns() {
            return self.dns.set_manual(&DnsSettings::from_ip(ip), None).await;
        }
        Ok(())
    }

    async fn run(&self, state_tx: &mpsc::Sender<StateInfo>) -> Result<()> {
        let mut child = Command::new(&self.settings.binary)
            .arg("--config")
            .arg(&self.settings.config_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Process(format!("не удалось запустить OpenVPN: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Process("нет вывода OpenVPN".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut client_ip: Option<IpAddr> = None;
        let mut auth_failed = false;

        loop {
            let line = tokio::select! {
                _ = self.stop.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!("Не удалось остановить OpenVPN: {}", e);
                    }
                    break;
                }
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Ошибка чтения вывода OpenVPN: {}", e);
                    break;
                }
            };
            debug!("openvpn: {}", line);

            match parse_log_line(&line) {
                Some(LogEvent::AuthFailed) => {
                    auth_failed = true;
                    let mut info = self.state(VpnState::Exiting);
                    info.is_auth_error = true;
                    let _ = state_tx.send(info).await;
                }
                Some(LogEvent::PushedDns(ip)) => {
                    if let Ok(mut pushed) = self.pushed_dns.lock() {
                        *pushed = Some(ip);
                    }
                    let _ = state_tx.send(self.state(VpnState::GetConfig)).await;
                }
                Some(LogEvent::AssignedIp(ip)) => {
                    client_ip = Some(ip);
                    let _ = state_tx.send(self.state(VpnState::AssignIp)).await;
                    let _ = state_tx
                        .send(self.state(VpnState::Initialised).with_client_ip(ip))
                        .await;
                }
                Some(LogEvent::State(VpnState::Connected)) => {
                    self.connected.store(true, Ordering::SeqCst);
                    if let Err(e) = self.apply_dns().await {
                        warn!("Не удалось установить DNS: {}", e);
                    }
                    let mut info = self.state(VpnState::Connected).with_server(
                        self.settings.host.host,
                        self.settings.port,
                        self.settings.is_tcp,
                    );
                    info.client_ip = client_ip;
                    info.exit_server_id = self.settings.exit_server_id.clone();
                    let _ = state_tx.send(info).await;
                }
                Some(LogEvent::State(VpnState::Reconnecting)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    let _ = state_tx.send(self.state(VpnState::Reconnecting)).await;
                }
                Some(LogEvent::State(state)) => {
                    let _ = state_tx.send(self.state(state)).await;
                }
                None => {}
            }
        }

        let status = child.wait().await?;
        self.connected.store(false, Ordering::SeqCst);

        if auth_failed {
            return Err(Error::Authentication("AUTH_FAILED".into()));
        }
        if self.stop.is_cancelled() || status.success() {
            return Ok(());
        }
        Err(Error::Process(format!("OpenVPN завершился: {}", status)))
    }
}

#[async_trait]
impl Process for OpenVpnProcess {
    fn vpn_type(&self) -> VpnType {
        VpnType::OpenVpn
    }

    async fn init(&self) -> Result<()> {
        if tokio::fs::metadata(&self.settings.binary).await.is_err() {
            return Err(Error::Process(format!(
                "OpenVPN не найден: {}",
                self.settings.binary.display()
            )));
        }
        Ok(())
    }

    async fn connect(&self, state_tx: mpsc::Sender<StateInfo>) -> Result<()> {
        if self.stop.is_cancelled() {
            info!("Отключение запрошено, OpenVPN не запускается");
            return Ok(());
        }
        self.write_files().await?;
        let result = self.run(&state_tx).await;
        self.remove_files().await;

        if let Err(e) = self.dns.delete_manual(None).await {
            warn!("Не удалось восстановить DNS: {}", e);
        }
        result
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop.cancel();
        Ok(())
    }

    fn is_paused(&self) -> bool {
        false
    }

    async fn pause(&self) -> Result<()> {
        Err(Error::Process("пауза не поддерживается для OpenVPN".into()))
    }

    async fn resume(&self) -> Result<()> {
        Ok(())
    }

    async fn set_manual_dns(&self, dns: &DnsSettings) -> Result<()> {
        if let Ok(mut manual) = self.manual_dns.lock() {
            *manual = dns.clone();
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.dns.set_manual(dns, None).await
    }

    async fn reset_manual_dns(&self) -> Result<()> {
        if let Ok(mut manual) = self.manual_dns.lock() {
            *manual = DnsSettings::default();
        }
        if self.connected.load(Ordering::SeqCst) {
            if let Some(ip) = self.pushed_dns() {
                return self.dns.set_manual(&DnsSettings::from_ip(ip), None).await;
            }
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
        self.pushed_dns()
    }
}

fn quote(path: &Path) -> String {
    format!("\"{}\"", path.display())
}

async fn write_private(path: &Path, content: &str) -> Result<()> {
    tokio::fs::write(path, content).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}
