//! Сервис демона VPN клиента
//!
//! Этот модуль отвечает за:
//! - Публичный API подключения (connect/disconnect/pause/resume)
//! - Управление kill switch и DNS
//! - Сессию, статус аккаунта и периодическую проверку сессии
//! - Ключи WireGuard (получатель для [`KeysManager`])
//!
//! Сам цикл подключения находится в модуле `connect`.

mod connect;

use async_trait::async_trait;
use chrono::Utc;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vpnd_core::{
    AntiTrackerMetadata, ConnectionParams, DnsSettings, Error, Process, Result, VpnType,
};

use crate::antitracker::{effective_dns, AntiTrackerDns};
use crate::api::Api;
use crate::dns::Dns;
use crate::events::EventReceiver;
use crate::factory::{ProcessFactory, VpnCredentials, WireGuardCredentials};
use crate::firewall::Firewall;
use crate::netchange::{NetworkInfo, RouteChangeDetector};
use crate::preferences::{AccountStatus, Preferences, PreferencesStore, SessionStatus};
use crate::splittun::{SplitTunnel, SplitTunnelConfig};
use crate::state::{RequiredState, RequiredStateCell, VpnSessionInfo};
use crate::wgkeys::{KeysManager, KeysReceiver, WireGuardKeysInfo};

pub use connect::reconnect_delay;

/// Интервал периодической проверки сессии
pub const SESSION_CHECK_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Сколько можно подключаться со старым ключом WireGuard после срока смены
pub const WG_KEY_GRACE_PERIOD: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Зависимости сервиса
pub struct ServiceDeps {
    /// Firewall
    pub firewall: Arc<Firewall>,
    /// DNS
    pub dns: Arc<Dns>,
    /// Детектор изменений маршрутизации
    pub detector: Arc<dyn RouteChangeDetector>,
    /// Сетевая информация
    pub net_info: Arc<dyn NetworkInfo>,
    /// Получатель событий
    pub events: Arc<dyn EventReceiver>,
    /// Split tunnel
    pub split_tunnel: Arc<dyn SplitTunnel>,
    /// Фабрика VPN процессов
    pub factory: Arc<dyn ProcessFactory>,
    /// REST API сервера (может отсутствовать)
    pub api: Option<Arc<dyn Api>>,
    /// Хранилище настроек
    pub preferences: Arc<dyn PreferencesStore>,
    /// Адреса DNS серверов AntiTracker
    pub anti_tracker: Arc<dyn AntiTrackerDns>,
}

/// Состояние kill switch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KillSwitchState {
    /// Firewall включён
    pub enabled: bool,
    /// Постоянный режим
    pub persistent: bool,
    /// Локальная сеть разрешена
    pub allow_lan: bool,
    /// Multicast в локальной сети разрешён
    pub allow_lan_multicast: bool,
    /// API серверы разрешены
    pub allow_api_servers: bool,
}

/// Настройки DNS подключения (читаются заново перед каждой попыткой)
#[derive(Debug, Clone, Default)]
struct DnsParams {
    manual: DnsSettings,
    anti_tracker: AntiTrackerMetadata,
    multihop: bool,
}

/// Активный туннель
#[derive(Clone)]
struct ActiveTunnel {
    process: Arc<dyn Process>,
    /// Отключение запрошено (попытка не должна запускать процесс)
    stop_requested: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Сервис демона
pub struct Service {
    weak_self: Weak<Service>,

    required_state: RequiredStateCell,
    connect_lock: tokio::sync::Mutex<()>,
    setup_lock: tokio::sync::Mutex<()>,
    active: tokio::sync::Mutex<Option<ActiveTunnel>>,
    session_info: tokio::sync::Mutex<VpnSessionInfo>,
    dns_params: tokio::sync::Mutex<DnsParams>,

    prefs: RwLock<Preferences>,
    store: Arc<dyn PreferencesStore>,

    firewall: Arc<Firewall>,
    dns: Arc<Dns>,
    detector: Arc<dyn RouteChangeDetector>,
    net_info: Arc<dyn NetworkInfo>,
    events: Arc<dyn EventReceiver>,
    split_tunnel: Arc<dyn SplitTunnel>,
    factory: Arc<dyn ProcessFactory>,
    api: Option<Arc<dyn Api>>,
    anti_tracker: Arc<dyn AntiTrackerDns>,
    keys: Arc<KeysManager>,

    session_checker: Mutex<Option<CancellationToken>>,
}

impl Service {
    /// Создать сервис
    ///
    /// Настройки загружаются из хранилища.
    pub fn new(deps: ServiceDeps) -> Result<Arc<Self>> {
        let prefs = deps.preferences.load()?;
        let keys = Arc::new(KeysManager::new(deps.api.clone()));

        let service = Arc::new_cyclic(|weak| Service {
            weak_self: weak.clone(),
            required_state: RequiredStateCell::new(),
            connect_lock: tokio::sync::Mutex::new(()),
            setup_lock: tokio::sync::Mutex::new(()),
            active: tokio::sync::Mutex::new(None),
            session_info: tokio::sync::Mutex::new(VpnSessionInfo::default()),
            dns_params: tokio::sync::Mutex::new(DnsParams::default()),
            prefs: RwLock::new(prefs),
            store: deps.preferences,
            firewall: deps.firewall,
            dns: deps.dns,
            detector: deps.detector,
            net_info: deps.net_info,
            events: deps.events,
            split_tunnel: deps.split_tunnel,
            factory: deps.factory,
            api: deps.api,
            anti_tracker: deps.anti_tracker,
            keys,
            session_checker: Mutex::new(None),
        });

        let receiver: Weak<dyn KeysReceiver> = Arc::downgrade(&service) as Weak<Service>;
        service.keys.init(receiver)?;

        Ok(service)
    }

    /// Применить сохранённые настройки и запустить фоновые задачи
    pub async fn init(&self) -> Result<()> {
        let prefs = self.preferences().await;

        self.firewall
            .allow_lan(prefs.is_fw_allow_lan, prefs.is_fw_allow_lan_multicast)
            .await?;

        if prefs.is_fw_persistent {
            info!("Firewall в постоянном режиме, включение...");
            self.firewall.set_persistent(true).await?;
            self.firewall.set_enabled(true).await?;
        }

        if prefs.is_fw_allow_api_servers {
            self.apply_api_servers_exceptions(true).await;
        }

        if prefs.session.is_logged_in() {
            self.start_session_checker();
            if let Err(e) = self.keys.start_rotation() {
                error!("Не удалось запустить смену ключей WireGuard: {}", e);
            }
        }

        info!("✓ Сервис инициализирован");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Подключение
    // ---------------------------------------------------------------------

    /// Подключиться и поддерживать подключение до явного отключения
    ///
    /// Ошибка первой попытки возвращается вызывающему, последующие разрывы
    /// приводят к переподключению.
    pub async fn connect(&self, mut params: ConnectionParams) -> Result<()> {
        self.check_account_before_connect().await?;

        params.normalize_hosts(&mut rand::thread_rng());

        if self.preferences().await.is_inverse_split_tunneling()
            && (params.firewall_on || params.firewall_on_during_connection)
        {
            info!("Инверсный split tunnel: firewall для подключения не используется");
            params.firewall_on = false;
            params.firewall_on_during_connection = false;
        }

        params.validate()?;

        match params.vpn_type {
            VpnType::OpenVpn => self.keep_connection(params).await,
            VpnType::WireGuard => {
                self.disconnect().await?;
                self.update_wireguard_keys_before_connect().await?;
                self.keep_connection(params).await
            }
        }
    }

    async fn check_account_before_connect(&self) -> Result<()> {
        let prefs = self.preferences().await;
        if !prefs.session.is_logged_in() || self.api.is_none() {
            return Ok(());
        }
        if prefs.account.active && !prefs.account.is_expired(Utc::now()) {
            return Ok(());
        }

        match self.request_session_status().await {
            Ok(status) if !status.active => Err(Error::Authentication("подписка не активна".into())),
            Ok(status) if status.is_expired(Utc::now()) => {
                Err(Error::Authentication("подписка истекла".into()))
            }
            Ok(_) => Ok(()),
            Err(Error::Api(e)) if e.is_account_not_active() => {
                Err(Error::Authentication("подписка не активна".into()))
            }
            Err(Error::NotLoggedIn) => Err(Error::NotLoggedIn),
            Err(e) => {
                warn!("Не удалось проверить статус аккаунта: {}", e);
                Ok(())
            }
        }
    }

    async fn update_wireguard_keys_before_connect(&self) -> Result<()> {
        let err = match self.keys.update_keys_if_necessary().await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        let session = self.preferences().await.session;
        if !session.is_wg_credentials_ok() {
            return Err(err);
        }

        // подключаемся со старым ключом, если срок смены прошёл недавно
        let grace = session.wg_key_generated_at().and_then(|generated| {
            let interval = chrono::Duration::from_std(session.wg_keys_regen_interval()).ok()?;
            let grace = chrono::Duration::from_std(WG_KEY_GRACE_PERIOD).ok()?;
            Some(generated + interval + grace)
        });
        match grace {
            Some(deadline) if Utc::now() <= deadline => {
                warn!("Ключи WireGuard не обновлены, подключение со старым ключом: {}", err);
                Ok(())
            }
            _ => Err(err),
        }
    }

    /// Учётные данные для VPN процесса из текущей сессии
    async fn credentials(&self, vpn_type: VpnType) -> Result<VpnCredentials> {
        let session = self.preferences().await.session;
        match vpn_type {
            VpnType::OpenVpn => Ok(VpnCredentials::OpenVpn {
                username: session.openvpn_user,
                password: session.openvpn_pass,
            }),
            VpnType::WireGuard => {
                if !session.is_wg_credentials_ok() {
                    return Err(Error::Other("учётные данные WireGuard не заданы".into()));
                }
                let local_ip: IpAddr = session.wg_local_ip.parse().map_err(|_| {
                    Error::InvalidParams(format!(
                        "некорректный адрес WireGuard: {}",
                        session.wg_local_ip
                    ))
                })?;
                Ok(VpnCredentials::WireGuard(WireGuardCredentials {
                    private_key: session.wg_private_key,
                    preshared_key: session.wg_preshared_key,
                    local_ip,
                }))
            }
        }
    }

    /// Отключиться (ждёт полного завершения туннеля)
    pub async fn disconnect(&self) -> Result<()> {
        self.required_state.set(RequiredState::Disconnect);
        if let Err(e) = self.resume().await {
            error!("Не удалось снять паузу: {}", e);
        }
        self.disconnect_active().await
    }

    /// Приостановить подключение
    ///
    /// Без активного туннеля ничего не делает.
    pub async fn pause(&self) -> Result<()> {
        let Some(process) = self.active_process().await else {
            return Ok(());
        };

        info!("Пауза подключения");
        self.firewall.client_paused().await;
        if let Err(e) = process.pause().await {
            self.firewall.client_resumed().await;
            return Err(e);
        }
        Ok(())
    }

    /// Снять подключение с паузы
    pub async fn resume(&self) -> Result<()> {
        let Some(process) = self.active_process().await else {
            return Ok(());
        };
        if !process.is_paused() {
            return Ok(());
        }

        info!("Снятие с паузы");
        process.resume().await?;
        self.firewall.client_resumed().await;
        Ok(())
    }

    /// Туннель существует
    pub async fn connected(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Тип активного туннеля
    pub async fn connected_type(&self) -> Option<VpnType> {
        self.active_process().await.map(|p| p.vpn_type())
    }

    /// Туннель на паузе
    pub async fn is_paused(&self) -> bool {
        match self.active_process().await {
            Some(process) => process.is_paused(),
            None => false,
        }
    }

    /// Адреса текущей VPN сессии
    pub async fn vpn_session_info(&self) -> VpnSessionInfo {
        self.session_info.lock().await.clone()
    }

    /// Требуемое состояние подключения
    pub fn required_state(&self) -> RequiredState {
        self.required_state.get()
    }

    async fn active_process(&self) -> Option<Arc<dyn Process>> {
        self.active.lock().await.as_ref().map(|a| a.process.clone())
    }

    // ---------------------------------------------------------------------
    // DNS
    // ---------------------------------------------------------------------

    /// Установить пользовательский DNS (применяется сразу, если туннель есть)
    ///
    /// При включённом AntiTracker туннель продолжает использовать его DNS.
    pub async fn set_manual_dns(&self, dns: DnsSettings) -> Result<()> {
        self.dns_params.lock().await.manual = dns;
        self.apply_dns_params().await
    }

    /// Вернуть DNS туннеля по умолчанию
    pub async fn reset_manual_dns(&self) -> Result<()> {
        self.set_manual_dns(DnsSettings::default()).await
    }

    /// Текущий пользовательский DNS
    pub async fn manual_dns(&self) -> DnsSettings {
        self.dns_params.lock().await.manual.clone()
    }

    /// Включить/выключить AntiTracker (применяется сразу, если туннель есть)
    pub async fn set_anti_tracker(&self, anti_tracker: AntiTrackerMetadata) -> Result<()> {
        self.dns_params.lock().await.anti_tracker = anti_tracker;
        self.apply_dns_params().await
    }

    /// Текущие настройки AntiTracker
    pub async fn anti_tracker(&self) -> AntiTrackerMetadata {
        self.dns_params.lock().await.anti_tracker
    }

    /// DNS для попытки: AntiTracker или пользовательский DNS
    async fn resolve_dns(&self) -> Result<DnsSettings> {
        let params = self.dns_params.lock().await.clone();
        effective_dns(
            self.anti_tracker.as_ref(),
            &params.manual,
            params.anti_tracker,
            params.multihop,
        )
    }

    async fn apply_dns_params(&self) -> Result<()> {
        let Some(process) = self.active_process().await else {
            return Ok(());
        };
        let dns = self.resolve_dns().await?;
        self.apply_manual_dns(process.as_ref(), &dns).await
    }

    async fn apply_manual_dns(&self, process: &dyn Process, dns: &DnsSettings) -> Result<()> {
        if dns.is_empty() {
            let default_dns = process.default_dns().map(DnsSettings::from_ip);
            self.firewall.on_change_dns(default_dns).await?;
            process.reset_manual_dns().await
        } else {
            self.firewall.on_change_dns(Some(dns.clone())).await?;
            process.set_manual_dns(dns).await
        }
    }

    // ---------------------------------------------------------------------
    // Kill switch
    // ---------------------------------------------------------------------

    /// Включить/выключить firewall
    pub async fn set_kill_switch_state(&self, enable: bool) -> Result<()> {
        if !enable && self.prefs.read().await.is_fw_persistent {
            return Err(Error::Firewall(
                "firewall в постоянном режиме, выключение невозможно".into(),
            ));
        }
        self.firewall.set_enabled(enable).await?;
        self.events.on_kill_switch_state_changed().await;
        Ok(())
    }

    /// Состояние kill switch
    pub async fn kill_switch_state(&self) -> Result<KillSwitchState> {
        let enabled = self.firewall.get_enabled().await?;
        let prefs = self.prefs.read().await;
        Ok(KillSwitchState {
            enabled,
            persistent: prefs.is_fw_persistent,
            allow_lan: prefs.is_fw_allow_lan,
            allow_lan_multicast: prefs.is_fw_allow_lan_multicast,
            allow_api_servers: prefs.is_fw_allow_api_servers,
        })
    }

    /// Постоянный режим firewall
    pub async fn set_kill_switch_is_persistent(&self, persistent: bool) -> Result<()> {
        self.update_preferences(|p| p.is_fw_persistent = persistent)
            .await?;
        self.firewall.set_persistent(persistent).await?;
        if persistent {
            self.firewall.set_enabled(true).await?;
        }
        self.events.on_kill_switch_state_changed().await;
        Ok(())
    }

    /// Разрешить локальную сеть
    pub async fn set_kill_switch_allow_lan(&self, allow: bool) -> Result<()> {
        self.update_preferences(|p| p.is_fw_allow_lan = allow).await?;
        let multicast = self.prefs.read().await.is_fw_allow_lan_multicast;
        self.firewall.allow_lan(allow, multicast).await?;
        self.events.on_kill_switch_state_changed().await;
        Ok(())
    }

    /// Разрешить multicast в локальной сети
    pub async fn set_kill_switch_allow_lan_multicast(&self, allow: bool) -> Result<()> {
        self.update_preferences(|p| p.is_fw_allow_lan_multicast = allow)
            .await?;
        let lan = self.prefs.read().await.is_fw_allow_lan;
        self.firewall.allow_lan(lan, allow).await?;
        self.events.on_kill_switch_state_changed().await;
        Ok(())
    }

    /// Разрешить API серверы при включённом firewall
    pub async fn set_kill_switch_allow_api_servers(&self, allow: bool) -> Result<()> {
        if !allow && !self.prefs.read().await.session.is_logged_in() {
            return Err(Error::NotLoggedIn);
        }
        self.update_preferences(|p| p.is_fw_allow_api_servers = allow)
            .await?;
        self.apply_api_servers_exceptions(allow).await;
        self.events.on_kill_switch_state_changed().await;
        Ok(())
    }

    async fn apply_api_servers_exceptions(&self, allow: bool) {
        let Some(api) = &self.api else { return };
        let addresses = api.api_addresses();
        if addresses.is_empty() {
            return;
        }

        let result = if allow {
            self.firewall
                .add_hosts_to_exceptions(&addresses, false, true)
                .await
        } else {
            self.firewall
                .remove_hosts_from_exceptions(&addresses, false, true)
                .await
        };
        if let Err(e) = result {
            error!("Не удалось обновить исключения для API серверов: {}", e);
        }
    }

    /// Последний клиент UI отключился
    ///
    /// Выключает firewall, если он не в постоянном режиме. Возвращает `true`,
    /// если демон должен завершиться.
    pub async fn on_control_connection_closed(&self) -> Result<bool> {
        let _setup = self.setup_lock.lock().await;
        let prefs = self.preferences().await;

        if !prefs.is_fw_persistent && self.firewall.get_enabled().await? {
            info!("Клиент UI отключился, выключение firewall");
            self.firewall.set_enabled(false).await?;
        }

        Ok(prefs.is_stop_on_client_disconnect)
    }

    /// Доступ к API заблокирован firewall
    ///
    /// Возвращает причину блокировки.
    pub async fn is_connectivity_blocked(&self) -> Option<String> {
        {
            let prefs = self.prefs.read().await;
            if prefs.is_fw_allow_api_servers || !prefs.session.is_logged_in() {
                return None;
            }
        }
        if self.connected().await && !self.is_paused().await {
            return None;
        }
        match self.firewall.get_enabled().await {
            Ok(true) => Some(
                "доступ к API заблокирован firewall (разрешите API серверы или подключитесь)"
                    .to_string(),
            ),
            _ => None,
        }
    }

    // ---------------------------------------------------------------------
    // Настройки и сессия
    // ---------------------------------------------------------------------

    /// Копия текущих настроек
    pub async fn preferences(&self) -> Preferences {
        self.prefs.read().await.clone()
    }

    async fn update_preferences<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut Preferences),
    {
        let mut prefs = self.prefs.write().await;
        update(&mut prefs);
        self.store.save(&prefs)
    }

    /// Останавливать демон при отключении клиента UI
    pub async fn set_stop_on_client_disconnect(&self, stop: bool) -> Result<()> {
        self.update_preferences(|p| p.is_stop_on_client_disconnect = stop)
            .await
    }

    /// Сохранить новую сессию
    pub async fn set_session(&self, session: SessionStatus) -> Result<()> {
        let logged_in = session.is_logged_in();
        self.update_preferences(|p| {
            p.session = session;
            p.account = AccountStatus::default();
        })
        .await?;
        self.events.on_service_session_changed().await;

        if logged_in {
            info!("✓ Сессия сохранена");
            self.start_session_checker();
            if let Err(e) = self.keys.start_rotation() {
                error!("Не удалось запустить смену ключей WireGuard: {}", e);
            }
        }
        Ok(())
    }

    /// Выход из аккаунта
    ///
    /// `delete_on_backend` - удалить сессию на сервере, `can_delete_locally` -
    /// удалить локально даже если сервер вернул ошибку.
    pub async fn logout(&self, delete_on_backend: bool, can_delete_locally: bool) -> Result<()> {
        info!("Выход из аккаунта...");

        self.stop_session_checker();
        self.keys.stop_rotation();

        if let Err(e) = self.disconnect().await {
            error!("Ошибка отключения при выходе: {}", e);
        }

        if !self.prefs.read().await.is_fw_persistent {
            if let Ok(true) = self.firewall.get_enabled().await {
                if let Err(e) = self.set_kill_switch_state(false).await {
                    error!("Не удалось выключить firewall: {}", e);
                }
            }
        }

        if delete_on_backend {
            let session = self.prefs.read().await.session.session.clone();
            if let Some(api) = &self.api {
                if let Err(e) = api.session_delete(&session).await {
                    if !can_delete_locally {
                        return Err(Error::Api(e));
                    }
                    warn!("Сессия не удалена на сервере: {}", e);
                }
            }
        }

        self.update_preferences(|p| {
            p.session = p.session.cleared();
            p.account = AccountStatus::default();
        })
        .await?;
        self.events.on_service_session_changed().await;

        info!("✓ Выход выполнен");
        Ok(())
    }

    /// Запросить статус сессии у сервера
    pub async fn request_session_status(&self) -> Result<AccountStatus> {
        let api = self
            .api
            .clone()
            .ok_or_else(|| Error::Other("API сервера не настроен".into()))?;

        let session = self.prefs.read().await.session.session.clone();
        if session.trim().is_empty() {
            return Err(Error::NotLoggedIn);
        }
        if let Some(reason) = self.is_connectivity_blocked().await {
            return Err(Error::Other(reason));
        }

        let result = api.session_status(&session).await;

        // пока ждали ответ, сессия могла смениться
        if self.prefs.read().await.session.session != session {
            return Err(Error::Other("сессия изменилась во время запроса".into()));
        }

        match result {
            Ok(resp) => {
                let status = AccountStatus::from(resp);
                self.update_preferences(|p| p.account = status.clone())
                    .await?;
                self.events.on_account_status(&session, &status).await;
                Ok(status)
            }
            Err(e) if e.is_session_not_found() => {
                warn!("Сессия не найдена на сервере, выход");
                if let Err(e) = self.logout(false, true).await {
                    error!("Ошибка выхода: {}", e);
                }
                Err(Error::Api(e))
            }
            Err(e) if e.is_account_not_active() => {
                let status = AccountStatus::default();
                self.update_preferences(|p| p.account = status.clone())
                    .await?;
                self.events.on_account_status(&session, &status).await;
                Err(Error::Api(e))
            }
            Err(e) => Err(Error::Api(e)),
        }
    }

    fn start_session_checker(&self) {
        self.stop_session_checker();

        let token = CancellationToken::new();
        match self.session_checker.lock() {
            Ok(mut checker) => *checker = Some(token.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(token.clone()),
        }

        let service = self.weak_self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(SESSION_CHECK_INTERVAL) => {}
                }
                let Some(service) = service.upgrade() else { break };
                if let Err(e) = service.request_session_status().await {
                    warn!("Проверка сессии не удалась: {}", e);
                }
            }
        });
    }

    fn stop_session_checker(&self) {
        let token = match self.session_checker.lock() {
            Ok(mut checker) => checker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(token) = token {
            token.cancel();
        }
    }

    // ---------------------------------------------------------------------
    // Split tunnel
    // ---------------------------------------------------------------------

    /// Настройки split tunnel
    pub async fn split_tunnel_set_config(&self, enabled: bool, inverse: bool) -> Result<()> {
        self.update_preferences(|p| {
            p.is_split_tunnel = enabled;
            p.is_split_tunnel_inverse = inverse;
        })
        .await?;
        self.apply_split_tunnel().await;
        self.events.on_split_tunnel_status_changed().await;
        Ok(())
    }

    async fn apply_split_tunnel(&self) {
        let (enabled, inverse) = {
            let prefs = self.prefs.read().await;
            (prefs.is_split_tunnel, prefs.is_split_tunnel_inverse)
        };
        let config = SplitTunnelConfig {
            enabled,
            inverse,
            vpn_connected: self.active.lock().await.is_some(),
            session: self.session_info.lock().await.clone(),
        };
        if let Err(e) = self.split_tunnel.apply_config(&config).await {
            error!("Не удалось применить настройки split tunnel: {}", e);
        }
    }

    // ---------------------------------------------------------------------
    // WireGuard
    // ---------------------------------------------------------------------

    /// Установить интервал смены ключей WireGuard
    pub async fn wireguard_set_keys_rotation_interval(&self, interval: Duration) -> Result<()> {
        self.update_preferences(|p| p.session.wg_keys_regen_interval_secs = interval.as_secs())
            .await?;
        info!("Интервал смены ключей WireGuard: {:?}", interval);
        self.events.on_service_session_changed().await;

        if self.prefs.read().await.session.is_logged_in() {
            self.keys.start_rotation()?;
        }
        Ok(())
    }

    /// Сгенерировать новые ключи WireGuard
    pub async fn wireguard_generate_keys(&self) -> Result<()> {
        self.keys.generate_keys().await
    }

    /// Менеджер ключей WireGuard
    pub fn keys_manager(&self) -> &Arc<KeysManager> {
        &self.keys
    }
}

#[async_trait]
impl KeysReceiver for Service {
    async fn wireguard_keys(&self) -> WireGuardKeysInfo {
        let session = self.prefs.read().await.session.clone();
        WireGuardKeysInfo {
            generated: session.wg_key_generated_at(),
            interval: session.wg_keys_regen_interval(),
            session: session.session,
            public_key: session.wg_public_key,
            private_key: session.wg_private_key,
            local_ip: session.wg_local_ip,
        }
    }

    async fn on_wireguard_keys_saved(&self, public_key: &str, private_key: &str, local_ip: &str) {
        let saved = self
            .update_preferences(|p| {
                p.session
                    .update_wg_credentials(public_key, private_key, local_ip, Utc::now())
            })
            .await;
        if let Err(e) = saved {
            error!("Не удалось сохранить ключи WireGuard: {}", e);
        }
        self.events.on_service_session_changed().await;

        if public_key.is_empty() || self.connected_type().await != Some(VpnType::WireGuard) {
            return;
        }

        // туннель переподключается с новыми ключами
        let Some(service) = self.weak_self.upgrade() else { return };
        tokio::spawn(async move {
            info!("Ключи WireGuard изменились, переподключение...");
            if let Err(e) = service.disconnect_active().await {
                error!("Ошибка переподключения: {}", e);
            }
        });
    }

    async fn connected_type(&self) -> Option<VpnType> {
        Service::connected_type(self).await
    }

    async fn is_connectivity_blocked(&self) -> Option<String> {
        Service::is_connectivity_blocked(self).await
    }

    async fn on_session_not_found(&self) {
        if let Err(e) = self.logout(false, true).await {
            error!("Ошибка выхода: {}", e);
        }
    }
}
