//! Тестовые реализации зависимостей сервиса

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::OsRng;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vpnd_core::{
    ApiError, ConnectionParams, DnsEncryptionAbilities, DnsSettings, Error, OpenVpnHost, Process,
    Result, StateInfo, VpnState, VpnType, WireGuardHost, WireGuardKeyPair,
};

use crate::antitracker::{AntiTrackerDnsInfo, AntiTrackerServers};
use crate::api::{Api, SessionStatusResponse};
use crate::dns::{Dns, DnsBackend};
use crate::events::EventReceiver;
use crate::factory::{ProcessFactory, VpnCredentials};
use crate::firewall::{ConnectedClient, Firewall, FirewallBackend};
use crate::netchange::{NetInterface, NetworkInfo, RouteChangeDetector};
use crate::preferences::{AccountStatus, MemoryPreferencesStore, Preferences, SessionStatus};
use crate::service::{Service, ServiceDeps};
use crate::splittun::{SplitTunnel, SplitTunnelConfig};

/// Адрес клиента в туннеле
pub const CLIENT_IP: &str = "10.0.0.2";
/// DNS туннеля
pub const TUNNEL_DNS: &str = "10.0.0.1";
/// Исходящий адрес до подключения
pub const OUTBOUND_IP: &str = "192.168.1.10";
/// DNS AntiTracker (режим hardcore не настроен)
pub const ANTI_TRACKER_DNS: &str = "10.0.254.2";

/// Ждать выполнения условия (не более минуты по часам tokio)
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..12_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("условие не выполнено");
}

/// Общий журнал вызовов (для проверки порядка шагов)
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn push(&self, event: &str) {
        self.0.lock().unwrap().push(event.to_string());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events().iter().any(|e| e == event)
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn position_after(&self, event: &str, after: usize) -> Option<usize> {
        self.events()
            .iter()
            .enumerate()
            .skip(after + 1)
            .find(|(_, e)| *e == event)
            .map(|(i, _)| i)
    }
}

// -------------------------------------------------------------------------
// Firewall
// -------------------------------------------------------------------------

#[derive(Default)]
struct FirewallMockState {
    enabled: bool,
    persistent: bool,
    fail_enable: bool,
    client_connected: usize,
    client_disconnected: usize,
    exceptions: Vec<IpAddr>,
    persistent_exceptions: Vec<IpAddr>,
    allow_lan: (bool, bool),
    dns: Option<DnsSettings>,
}

#[derive(Default)]
pub struct MockFirewallBackend {
    state: Mutex<FirewallMockState>,
    recorder: Recorder,
}

impl MockFirewallBackend {
    pub fn with_recorder(recorder: Recorder) -> Self {
        Self {
            state: Mutex::default(),
            recorder,
        }
    }

    pub fn enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }

    pub fn fail_enable(&self, fail: bool) {
        self.state.lock().unwrap().fail_enable = fail;
    }

    pub fn client_connected_calls(&self) -> usize {
        self.state.lock().unwrap().client_connected
    }

    pub fn client_disconnected_calls(&self) -> usize {
        self.state.lock().unwrap().client_disconnected
    }

    pub fn exceptions(&self) -> Vec<IpAddr> {
        self.state.lock().unwrap().exceptions.clone()
    }

    pub fn persistent_exceptions(&self) -> Vec<IpAddr> {
        self.state.lock().unwrap().persistent_exceptions.clone()
    }

    pub fn allow_lan(&self) -> (bool, bool) {
        self.state.lock().unwrap().allow_lan
    }

    pub fn dns(&self) -> Option<DnsSettings> {
        self.state.lock().unwrap().dns.clone()
    }
}

impl FirewallBackend for MockFirewallBackend {
    fn set_enabled(&self, enable: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_enable {
            return Err(Error::Firewall("mock failure".into()));
        }
        state.enabled = enable;
        self.recorder
            .push(if enable { "fw_enable" } else { "fw_disable" });
        Ok(())
    }

    fn get_enabled(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().enabled)
    }

    fn set_persistent(&self, persistent: bool) -> Result<()> {
        self.state.lock().unwrap().persistent = persistent;
        Ok(())
    }

    fn client_connected(&self, _client: &ConnectedClient) -> Result<()> {
        self.state.lock().unwrap().client_connected += 1;
        self.recorder.push("fw_client_connected");
        Ok(())
    }

    fn client_disconnected(&self) -> Result<()> {
        self.state.lock().unwrap().client_disconnected += 1;
        self.recorder.push("fw_client_disconnected");
        Ok(())
    }

    fn add_hosts_to_exceptions(&self, ips: &[IpAddr], _only_icmp: bool, persistent: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let list = if persistent {
            &mut state.persistent_exceptions
        } else {
            &mut state.exceptions
        };
        for ip in ips {
            if !list.contains(ip) {
                list.push(*ip);
            }
        }
        self.recorder.push("fw_add_exceptions");
        Ok(())
    }

    fn remove_hosts_from_exceptions(
        &self,
        ips: &[IpAddr],
        _only_icmp: bool,
        persistent: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let list = if persistent {
            &mut state.persistent_exceptions
        } else {
            &mut state.exceptions
        };
        list.retain(|ip| !ips.contains(ip));
        self.recorder.push("fw_remove_exceptions");
        Ok(())
    }

    fn allow_lan(&self, allow_lan: bool, allow_multicast: bool) -> Result<()> {
        self.state.lock().unwrap().allow_lan = (allow_lan, allow_multicast);
        Ok(())
    }

    fn set_dns(&self, dns: Option<&DnsSettings>) -> Result<()> {
        self.state.lock().unwrap().dns = dns.cloned();
        self.recorder.push(if dns.is_some() {
            "fw_dns_set"
        } else {
            "fw_dns_clear"
        });
        Ok(())
    }
}

// -------------------------------------------------------------------------
// DNS
// -------------------------------------------------------------------------

#[derive(Default)]
pub struct MockDnsBackend {
    current: Mutex<Option<DnsSettings>>,
    fail_next: AtomicBool,
    update_calls: AtomicUsize,
    recorder: Recorder,
}

impl MockDnsBackend {
    pub fn with_recorder(recorder: Recorder) -> Self {
        Self {
            recorder,
            ..Default::default()
        }
    }

    pub fn current(&self) -> Option<DnsSettings> {
        self.current.lock().unwrap().clone()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsBackend for MockDnsBackend {
    async fn set_manual(&self, dns: &DnsSettings, _local_ip: Option<IpAddr>) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Dns("mock failure".into()));
        }
        *self.current.lock().unwrap() = Some(dns.clone());
        self.recorder.push("dns_set");
        Ok(())
    }

    async fn delete_manual(&self, _local_ip: Option<IpAddr>) -> Result<()> {
        *self.current.lock().unwrap() = None;
        self.recorder.push("dns_delete");
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        Ok(())
    }

    async fn resume(&self, _default_dns: &DnsSettings) -> Result<()> {
        Ok(())
    }

    fn encryption_abilities(&self) -> Result<DnsEncryptionAbilities> {
        Ok(DnsEncryptionAbilities::default())
    }

    async fn apply_user_settings(&self) -> Result<()> {
        self.recorder.push("dns_apply_user_settings");
        Ok(())
    }

    async fn update_if_wrong_settings(&self) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// -------------------------------------------------------------------------
// Детектор маршрутов и сетевая информация
// -------------------------------------------------------------------------

#[derive(Default)]
struct DetectorMockState {
    route_changed: Option<mpsc::Sender<()>>,
    route_updated: Option<mpsc::Sender<()>>,
    interface: Option<NetInterface>,
    started: bool,
    uninits: usize,
}

#[derive(Default)]
pub struct MockDetector {
    state: Mutex<DetectorMockState>,
    recorder: Recorder,
}

impl MockDetector {
    pub fn with_recorder(recorder: Recorder) -> Self {
        Self {
            state: Mutex::default(),
            recorder,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().unwrap().route_changed.is_some()
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().unwrap().started
    }

    pub fn uninits(&self) -> usize {
        self.state.lock().unwrap().uninits
    }

    pub fn interface(&self) -> Option<NetInterface> {
        self.state.lock().unwrap().interface.clone()
    }

    /// Маршрут по умолчанию ушёл с интерфейса
    pub fn trigger_route_changed(&self) -> bool {
        match &self.state.lock().unwrap().route_changed {
            Some(tx) => tx.try_send(()).is_ok(),
            None => false,
        }
    }

    /// Маршруты изменились
    pub fn trigger_route_updated(&self) -> bool {
        match &self.state.lock().unwrap().route_updated {
            Some(tx) => tx.try_send(()).is_ok(),
            None => false,
        }
    }
}

impl RouteChangeDetector for MockDetector {
    fn init(
        &self,
        route_changed: mpsc::Sender<()>,
        route_updated: mpsc::Sender<()>,
        interface: NetInterface,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.route_changed = Some(route_changed);
        state.route_updated = Some(route_updated);
        state.interface = Some(interface);
        self.recorder.push("detector_init");
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.state.lock().unwrap().started = true;
        self.recorder.push("detector_start");
        Ok(())
    }

    fn stop(&self) {
        self.state.lock().unwrap().started = false;
        self.recorder.push("detector_stop");
    }

    fn uninit(&self) {
        let mut state = self.state.lock().unwrap();
        state.route_changed = None;
        state.route_updated = None;
        state.interface = None;
        state.started = false;
        state.uninits += 1;
        self.recorder.push("detector_uninit");
    }
}

pub struct MockNetInfo;

#[async_trait]
impl NetworkInfo for MockNetInfo {
    async fn outbound_ip(&self, ipv6: bool) -> Result<IpAddr> {
        if ipv6 {
            return Err(Error::Other("IPv6 недоступен".into()));
        }
        Ok(OUTBOUND_IP.parse().unwrap())
    }

    async fn interface_by_ip(&self, ip: IpAddr) -> Result<NetInterface> {
        Ok(NetInterface {
            name: "wg0".into(),
            address: ip,
        })
    }
}

// -------------------------------------------------------------------------
// События, split tunnel, API
// -------------------------------------------------------------------------

#[derive(Default)]
pub struct MockEvents {
    states: Mutex<Vec<StateInfo>>,
    accounts: Mutex<Vec<(String, AccountStatus)>>,
    kill_switch: AtomicUsize,
    split_tunnel: AtomicUsize,
    session: AtomicUsize,
}

impl MockEvents {
    pub fn count(&self, state: VpnState) -> usize {
        self.states
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.state == state)
            .count()
    }

    pub fn last(&self, state: VpnState) -> Option<StateInfo> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.state == state)
            .cloned()
    }

    pub async fn wait_for_state(&self, state: VpnState, count: usize) {
        wait_until(|| self.count(state) >= count).await;
    }

    pub fn account_statuses(&self) -> Vec<(String, AccountStatus)> {
        self.accounts.lock().unwrap().clone()
    }

    pub fn kill_switch_notifications(&self) -> usize {
        self.kill_switch.load(Ordering::SeqCst)
    }

    pub fn session_notifications(&self) -> usize {
        self.session.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventReceiver for MockEvents {
    async fn on_vpn_state_changed(&self, state: StateInfo) {
        self.states.lock().unwrap().push(state);
    }

    async fn on_account_status(&self, session: &str, status: &AccountStatus) {
        self.accounts
            .lock()
            .unwrap()
            .push((session.to_string(), status.clone()));
    }

    async fn on_kill_switch_state_changed(&self) {
        self.kill_switch.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_split_tunnel_status_changed(&self) {
        self.split_tunnel.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_service_session_changed(&self) {
        self.session.fetch_add(1, Ordering::SeqCst);
    }

    async fn is_client_connected(&self) -> bool {
        false
    }
}

#[derive(Default)]
pub struct MockSplitTunnel {
    configs: Mutex<Vec<SplitTunnelConfig>>,
}

impl MockSplitTunnel {
    pub fn last(&self) -> Option<SplitTunnelConfig> {
        self.configs.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SplitTunnel for MockSplitTunnel {
    async fn apply_config(&self, config: &SplitTunnelConfig) -> Result<()> {
        self.configs.lock().unwrap().push(config.clone());
        Ok(())
    }
}

pub struct MockApi {
    status: Mutex<std::result::Result<SessionStatusResponse, ApiError>>,
    key_set: Mutex<Vec<(String, String)>>,
    key_set_error: Mutex<Option<ApiError>>,
    delete_error: Mutex<Option<ApiError>>,
    deleted: Mutex<Vec<String>>,
}

impl MockApi {
    /// Адрес в туннеле, выдаваемый сервером при смене ключа
    pub const LOCAL_IP: &'static str = "10.0.0.77";

    pub fn set_session_status(&self, status: SessionStatusResponse) {
        *self.status.lock().unwrap() = Ok(status);
    }

    pub fn fail_session_status(&self, error: ApiError) {
        *self.status.lock().unwrap() = Err(error);
    }

    pub fn fail_key_set(&self, error: ApiError) {
        *self.key_set_error.lock().unwrap() = Some(error);
    }

    pub fn fail_session_delete(&self, error: ApiError) {
        *self.delete_error.lock().unwrap() = Some(error);
    }

    /// Вызовы смены ключа: (новый ключ, активный ключ)
    pub fn key_set_calls(&self) -> Vec<(String, String)> {
        self.key_set.lock().unwrap().clone()
    }

    pub fn deleted_sessions(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            status: Mutex::new(Ok(SessionStatusResponse {
                active: true,
                active_until: Utc::now().timestamp() + 30 * 24 * 60 * 60,
                current_plan: "standard".into(),
                is_free_trial: false,
            })),
            key_set: Mutex::default(),
            key_set_error: Mutex::default(),
            delete_error: Mutex::default(),
            deleted: Mutex::default(),
        }
    }
}

#[async_trait]
impl Api for MockApi {
    async fn session_status(
        &self,
        _session: &str,
    ) -> std::result::Result<SessionStatusResponse, ApiError> {
        self.status.lock().unwrap().clone()
    }

    async fn wireguard_key_set(
        &self,
        _session: &str,
        new_public_key: &str,
        active_public_key: &str,
    ) -> std::result::Result<IpAddr, ApiError> {
        self.key_set
            .lock()
            .unwrap()
            .push((new_public_key.to_string(), active_public_key.to_string()));
        if let Some(e) = self.key_set_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(Self::LOCAL_IP.parse().unwrap())
    }

    async fn session_delete(&self, session: &str) -> std::result::Result<(), ApiError> {
        if let Some(e) = self.delete_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.deleted.lock().unwrap().push(session.to_string());
        Ok(())
    }

    fn api_addresses(&self) -> Vec<IpAddr> {
        vec!["203.0.113.10".parse().unwrap()]
    }
}

// -------------------------------------------------------------------------
// VPN процесс
// -------------------------------------------------------------------------

/// Как завершается [`MockProcess::connect`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MockExit {
    /// Ждать `disconnect` (или `crash`)
    #[default]
    WaitDisconnect,
    /// Сразу вернуть ошибку
    Fail,
    /// Сразу запросить переподключение
    ReconnectionRequired,
    /// Паника
    Panic,
    /// Ждать `disconnect` и вернуть ошибку
    FailOnDisconnect,
}

/// Поведение процесса одной попытки
#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub create_error: bool,
    pub init_error: bool,
    pub init_delay: Duration,
    pub states: Vec<VpnState>,
    pub exit: MockExit,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            create_error: false,
            init_error: false,
            init_delay: Duration::ZERO,
            states: vec![VpnState::Initialised, VpnState::Connected],
            exit: MockExit::WaitDisconnect,
        }
    }
}

pub struct MockProcess {
    behavior: MockBehavior,
    vpn_type: VpnType,
    destination: IpAddr,
    dns: Arc<Dns>,
    recorder: Recorder,
    stop: CancellationToken,
    crash: CancellationToken,
    paused: AtomicBool,
    state_tx: Mutex<Option<mpsc::Sender<StateInfo>>>,
    disconnects: AtomicUsize,
    routing_changes: AtomicUsize,
}

impl MockProcess {
    /// Неожиданное завершение процесса
    pub fn crash(&self) {
        self.crash.cancel();
    }

    /// Отправить состояние, пока процесс работает
    pub async fn emit(&self, state: VpnState) {
        let tx = self.state_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            tx.send(self.state(state)).await.unwrap();
        }
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn routing_changes(&self) -> usize {
        self.routing_changes.load(Ordering::SeqCst)
    }

    fn state(&self, state: VpnState) -> StateInfo {
        let info = StateInfo::new(self.vpn_type, state, "");
        match state {
            VpnState::Initialised => info.with_client_ip(CLIENT_IP.parse().unwrap()),
            VpnState::Connected => info
                .with_client_ip(CLIENT_IP.parse().unwrap())
                .with_server(self.destination, 0, false),
            _ => info,
        }
    }
}

#[async_trait]
impl Process for MockProcess {
    fn vpn_type(&self) -> VpnType {
        self.vpn_type
    }

    async fn init(&self) -> Result<()> {
        self.recorder.push("process_init");
        if !self.behavior.init_delay.is_zero() {
            tokio::time::sleep(self.behavior.init_delay).await;
        }
        if self.behavior.init_error {
            return Err(Error::Process("mock init failure".into()));
        }
        Ok(())
    }

    async fn connect(&self, state_tx: mpsc::Sender<StateInfo>) -> Result<()> {
        self.recorder.push("process_connect");
        *self.state_tx.lock().unwrap() = Some(state_tx.clone());

        for state in &self.behavior.states {
            let _ = state_tx.send(self.state(*state)).await;
        }

        let result = match self.behavior.exit {
            MockExit::Panic => panic!("mock process panic"),
            MockExit::Fail => Err(Error::Process("mock failure".into())),
            MockExit::ReconnectionRequired => Err(Error::ReconnectionRequired("rekey".into())),
            MockExit::FailOnDisconnect => {
                self.stop.cancelled().await;
                Err(Error::Process("mock failure on disconnect".into()))
            }
            MockExit::WaitDisconnect => {
                tokio::select! {
                    _ = self.stop.cancelled() => Ok(()),
                    _ = self.crash.cancelled() => {
                        Err(Error::Process("процесс неожиданно завершился".into()))
                    }
                }
            }
        };

        self.state_tx.lock().unwrap().take();
        result
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.stop.cancel();
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn pause(&self) -> Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn set_manual_dns(&self, dns: &DnsSettings) -> Result<()> {
        self.dns.set_manual(dns, None).await
    }

    async fn reset_manual_dns(&self) -> Result<()> {
        self.dns.delete_manual(None).await
    }

    fn destination_ip(&self) -> IpAddr {
        self.destination
    }

    fn is_ipv6_in_tunnel(&self) -> bool {
        false
    }

    async fn on_routing_changed(&self) -> Result<()> {
        self.routing_changes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn default_dns(&self) -> Option<IpAddr> {
        TUNNEL_DNS.parse().ok()
    }
}

/// Фабрика с очередью поведений (пустая очередь - поведение по умолчанию)
pub struct MockFactory {
    dns: Arc<Dns>,
    recorder: Recorder,
    script: Mutex<VecDeque<MockBehavior>>,
    attempts: AtomicUsize,
    processes: Mutex<Vec<Arc<MockProcess>>>,
    params: Mutex<Vec<ConnectionParams>>,
    credentials: Mutex<Vec<VpnCredentials>>,
}

impl MockFactory {
    pub fn new(dns: Arc<Dns>, recorder: Recorder) -> Self {
        Self {
            dns,
            recorder,
            script: Mutex::default(),
            attempts: AtomicUsize::new(0),
            processes: Mutex::default(),
            params: Mutex::default(),
            credentials: Mutex::default(),
        }
    }

    pub fn script(&self, behavior: MockBehavior) {
        self.script.lock().unwrap().push_back(behavior);
    }

    /// Количество вызовов `create` (включая ошибки)
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Количество созданных процессов
    pub fn created(&self) -> usize {
        self.processes.lock().unwrap().len()
    }

    pub fn process(&self, index: usize) -> Arc<MockProcess> {
        self.processes.lock().unwrap()[index].clone()
    }

    pub fn params(&self) -> Vec<ConnectionParams> {
        self.params.lock().unwrap().clone()
    }

    pub fn credentials(&self) -> Vec<VpnCredentials> {
        self.credentials.lock().unwrap().clone()
    }
}

impl ProcessFactory for MockFactory {
    fn create(
        &self,
        params: &ConnectionParams,
        credentials: &VpnCredentials,
    ) -> Result<Arc<dyn Process>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = self.script.lock().unwrap().pop_front().unwrap_or_default();
        if behavior.create_error {
            return Err(Error::Process("mock create failure".into()));
        }

        self.params.lock().unwrap().push(params.clone());
        self.credentials.lock().unwrap().push(credentials.clone());

        let process = Arc::new(MockProcess {
            behavior,
            vpn_type: params.vpn_type,
            destination: params.destination_ip().unwrap(),
            dns: self.dns.clone(),
            recorder: self.recorder.clone(),
            stop: CancellationToken::new(),
            crash: CancellationToken::new(),
            paused: AtomicBool::new(false),
            state_tx: Mutex::new(None),
            disconnects: AtomicUsize::new(0),
            routing_changes: AtomicUsize::new(0),
        });
        self.processes.lock().unwrap().push(process.clone());
        Ok(process)
    }
}

// -------------------------------------------------------------------------
// Окружение сервиса
// -------------------------------------------------------------------------

/// Настройки авторизованного пользователя с активной подпиской
pub fn logged_in_prefs() -> Preferences {
    let keys = WireGuardKeyPair::generate(&mut OsRng);
    Preferences {
        session: SessionStatus {
            account_id: "account".into(),
            session: "token".into(),
            openvpn_user: "user".into(),
            openvpn_pass: "pass".into(),
            wg_public_key: keys.public_key().to_string(),
            wg_private_key: keys.private_key().to_string(),
            wg_local_ip: CLIENT_IP.into(),
            wg_key_generated: Utc::now().timestamp(),
            ..Default::default()
        },
        account: AccountStatus {
            active: true,
            active_until: Utc::now().timestamp() + 30 * 24 * 60 * 60,
            current_plan: "standard".into(),
            is_free_trial: false,
        },
        ..Default::default()
    }
}

pub struct TestEnv {
    pub recorder: Recorder,
    pub firewall: Arc<MockFirewallBackend>,
    pub dns: Arc<MockDnsBackend>,
    pub detector: Arc<MockDetector>,
    pub events: Arc<MockEvents>,
    pub split_tunnel: Arc<MockSplitTunnel>,
    pub factory: Arc<MockFactory>,
    pub api: Arc<MockApi>,
    pub store: Arc<MemoryPreferencesStore>,
    pub anti_tracker: Arc<AntiTrackerServers>,
    firewall_service: Arc<Firewall>,
    dns_service: Arc<Dns>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_preferences(logged_in_prefs())
    }

    pub fn with_preferences(prefs: Preferences) -> Self {
        let recorder = Recorder::default();
        let firewall = Arc::new(MockFirewallBackend::with_recorder(recorder.clone()));
        let dns = Arc::new(MockDnsBackend::with_recorder(recorder.clone()));
        let dns_service = Arc::new(Dns::new(dns.clone()));

        Self {
            firewall_service: Arc::new(Firewall::new(firewall.clone())),
            factory: Arc::new(MockFactory::new(dns_service.clone(), recorder.clone())),
            detector: Arc::new(MockDetector::with_recorder(recorder.clone())),
            events: Arc::new(MockEvents::default()),
            split_tunnel: Arc::new(MockSplitTunnel::default()),
            api: Arc::new(MockApi::default()),
            store: Arc::new(MemoryPreferencesStore::new(prefs)),
            anti_tracker: Arc::new(AntiTrackerServers {
                default: AntiTrackerDnsInfo {
                    ip: ANTI_TRACKER_DNS.parse().ok(),
                    multihop_ip: None,
                },
                hardcore: AntiTrackerDnsInfo::default(),
            }),
            recorder,
            firewall,
            dns,
            dns_service,
        }
    }

    pub fn service(&self) -> Arc<Service> {
        Service::new(ServiceDeps {
            firewall: self.firewall_service.clone(),
            dns: self.dns_service.clone(),
            detector: self.detector.clone(),
            net_info: Arc::new(MockNetInfo),
            events: self.events.clone(),
            split_tunnel: self.split_tunnel.clone(),
            factory: self.factory.clone(),
            api: Some(self.api.clone() as Arc<dyn Api>),
            preferences: self.store.clone(),
            anti_tracker: self.anti_tracker.clone(),
        })
        .unwrap()
    }

    /// Параметры WireGuard с `hosts` серверами
    pub fn wireguard_params(&self, hosts: u8) -> ConnectionParams {
        let mut params = ConnectionParams::wireguard();
        params.wireguard.entry_hosts = (1..=hosts)
            .map(|i| WireGuardHost {
                hostname: format!("wg{}", i),
                host: IpAddr::from([198, 51, 100, i]),
                public_key: WireGuardKeyPair::generate(&mut OsRng).public_key().to_string(),
                local_ip: TUNNEL_DNS.parse().unwrap(),
            })
            .collect();
        params
    }

    pub fn openvpn_params(&self) -> ConnectionParams {
        let mut params = ConnectionParams::openvpn();
        params.openvpn.entry_hosts = vec![OpenVpnHost {
            hostname: "ovpn1".into(),
            host: "198.51.100.30".parse().unwrap(),
        }];
        params
    }
}
