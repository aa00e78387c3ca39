//! Цикл подключения
//!
//! Этот модуль отвечает за:
//! - Внешний цикл: переподключение после неожиданного разрыва
//! - Одну попытку подключения: firewall, DNS, запуск VPN процесса, завершение
//! - Обработку состояний VPN процесса и изменений маршрутизации
//!
//! Порядок шагов попытки:
//! 1. Остановить предыдущий туннель
//! 2. Инициализировать процесс, запомнить исходящие адреса
//! 3. Включить firewall, добавить сервер в исключения
//! 4. Настроить DNS (AntiTracker или пользовательский)
//! 5. Запустить процесс, если отключение ещё не запрошено, и ждать его завершения
//! 6. Завершение в обратном порядке (маршруты, правило DNS, клиент firewall,
//!    выключение firewall, DNS процесса)

use std::any::Any;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vpnd_core::{ConnectionParams, DnsSettings, Error, Process, Result, StateInfo, VpnState, VpnType};

use super::{ActiveTunnel, DnsParams, Service};
use crate::firewall::ConnectedClient;
use crate::state::{RequiredState, VpnSessionInfo};

/// Пауза между повторными быстрыми разрывами
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Попытка дольше этого времени считается удачной (переподключение без паузы)
const LONG_ATTEMPT: Duration = Duration::from_secs(30);

/// Шаг ожидания перед переподключением (проверка запроса на отключение)
const DISCONNECT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Пауза перед переподключением
///
/// `pending` - пауза после предыдущих быстрых разрывов (0 для первого
/// переподключения, затем [`RECONNECT_DELAY`]).
pub fn reconnect_delay(
    pending: Duration,
    attempt_duration: Duration,
    reconnection_requested: bool,
) -> Duration {
    if attempt_duration >= LONG_ATTEMPT || reconnection_requested {
        Duration::ZERO
    } else {
        pending
    }
}

/// Данные одной попытки подключения
struct Attempt {
    process: Arc<dyn Process>,
    /// Адреса, добавляемые в исключения firewall (сервер и прокси)
    destinations: Vec<IpAddr>,
    /// Настоящий адрес сервера для подключений через прокси
    endpoint: Option<(IpAddr, u16, bool)>,
    firewall_auto_enabled: AtomicBool,
    exceptions_added: AtomicBool,
    /// Отключение запрошено до запуска процесса
    stop_requested: CancellationToken,
    /// Началось завершение: реакции на состояния больше не выполняются
    closing: Mutex<bool>,
}

impl Attempt {
    fn new(
        process: Arc<dyn Process>,
        params: &ConnectionParams,
        stop_requested: CancellationToken,
    ) -> Self {
        let mut destinations = vec![process.destination_ip()];
        let mut endpoint = None;

        if params.vpn_type == VpnType::OpenVpn {
            if let Some(proxy) = &params.openvpn.proxy {
                destinations.push(proxy.address);
                endpoint = params
                    .openvpn
                    .entry_hosts
                    .first()
                    .map(|h| (h.host, params.openvpn.port, params.openvpn.is_tcp));
            }
        }

        Self {
            process,
            destinations,
            endpoint,
            firewall_auto_enabled: AtomicBool::new(false),
            exceptions_added: AtomicBool::new(false),
            stop_requested,
            closing: Mutex::new(false),
        }
    }

    /// Время, тип VPN и (для прокси) настоящий адрес сервера
    fn decorate(&self, mut state: StateInfo) -> StateInfo {
        state.time = chrono::Utc::now().timestamp();
        state.vpn_type = self.process.vpn_type();

        if state.state == VpnState::Connected {
            if let Some((ip, port, is_tcp)) = self.endpoint {
                state.server_ip = Some(ip);
                state.server_port = port;
                state.is_tcp = is_tcp;
            }
        }
        state
    }
}

/// Каналы, принадлежащие обработчику попытки
struct MonitorChannels {
    state_rx: mpsc::Receiver<StateInfo>,
    route_changed_tx: mpsc::Sender<()>,
    route_changed_rx: mpsc::Receiver<()>,
    route_updated_tx: mpsc::Sender<()>,
    route_updated_rx: mpsc::Receiver<()>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "неизвестная паника".to_string()
    }
}

impl Service {
    /// Подключаться, пока не запрошено отключение
    pub(super) async fn keep_connection(&self, params: ConnectionParams) -> Result<()> {
        if !self.prefs.read().await.session.is_logged_in() {
            return Err(Error::NotLoggedIn);
        }

        let result = self.keep_connection_loop(&params).await;

        // без клиентов UI результат виден только в логе
        if !self.events.is_client_connected().await {
            match &result {
                Ok(()) => info!("VPN отключён"),
                Err(e) => error!("Не удалось подключить VPN: {}", e),
            }
        }
        result
    }

    async fn keep_connection_loop(&self, params: &ConnectionParams) -> Result<()> {
        *self.dns_params.lock().await = DnsParams {
            manual: params.manual_dns.clone(),
            anti_tracker: params.anti_tracker,
            multihop: params.is_multihop(),
        };

        self.required_state.set(RequiredState::Connect);
        self.events
            .on_vpn_state_changed(StateInfo::new(
                params.vpn_type,
                VpnState::Connecting,
                "Подключение",
            ))
            .await;

        // перед первым переподключением паузы нет
        let mut pending_delay = Duration::ZERO;

        loop {
            let started = Instant::now();

            let result = match self.create_process(params).await {
                Ok(process) => self.connect_attempt(process, params).await,
                Err(e) => Err(e),
            };

            let reconnection_requested =
                matches!(&result, Err(e) if e.is_reconnection_required());

            if let Err(e) = &result {
                error!("Ошибка подключения: {}", e);
                // ошибка возвращается только для первой попытки
                if self.required_state.get() == RequiredState::Connect {
                    return result;
                }
            }

            if self.required_state.get() != RequiredState::KeepConnection {
                break;
            }

            self.events
                .on_vpn_state_changed(StateInfo::new(
                    params.vpn_type,
                    VpnState::Reconnecting,
                    "Переподключение после разрыва",
                ))
                .await;

            if reconnection_requested {
                info!("VPN процесс запросил переподключение");
            }

            let delay = reconnect_delay(pending_delay, started.elapsed(), reconnection_requested);
            if delay.is_zero() {
                info!("Переподключение...");
            } else {
                info!("Переподключение (пауза {:?})...", delay);
                let until = Instant::now() + delay;
                while Instant::now() < until
                    && self.required_state.get() != RequiredState::Disconnect
                {
                    tokio::time::sleep(DISCONNECT_POLL_INTERVAL).await;
                }
            }

            if self.required_state.get() != RequiredState::KeepConnection {
                break;
            }
            pending_delay = RECONNECT_DELAY;
        }

        Ok(())
    }

    /// Новый VPN процесс с актуальными учётными данными
    async fn create_process(&self, params: &ConnectionParams) -> Result<Arc<dyn Process>> {
        let credentials = self.credentials(params.vpn_type).await?;
        self.factory.create(params, &credentials).map_err(|e| {
            error!("Не удалось создать VPN процесс: {}", e);
            e
        })
    }

    /// Одна попытка подключения
    ///
    /// Возвращается после завершения VPN процесса и полной очистки.
    async fn connect_attempt(
        &self,
        process: Arc<dyn Process>,
        params: &ConnectionParams,
    ) -> Result<()> {
        if let Err(e) = self.disconnect_active().await {
            return Err(Error::Process(format!(
                "не удалось остановить активное подключение: {}",
                e
            )));
        }

        let result = {
            let _connect = self.connect_lock.lock().await;
            self.run_attempt(process, params).await
        };

        // статус сессии проверяется после каждого отключения
        if self.api.is_some() {
            if let Some(service) = self.weak_self.upgrade() {
                tokio::spawn(async move {
                    if let Err(e) = service.request_session_status().await {
                        debug!("Статус сессии не получен: {}", e);
                    }
                });
            }
        }

        result
    }

    async fn run_attempt(&self, process: Arc<dyn Process>, params: &ConnectionParams) -> Result<()> {
        let service = self
            .weak_self
            .upgrade()
            .ok_or_else(|| Error::Other("сервис остановлен".into()))?;

        info!("Подключение...");

        let (done_tx, done_rx) = watch::channel(false);
        let stop_requested = CancellationToken::new();
        *self.active.lock().await = Some(ActiveTunnel {
            process: process.clone(),
            stop_requested: stop_requested.clone(),
            done: done_rx,
        });

        let (state_tx, state_rx) = mpsc::channel(1);
        let (route_changed_tx, route_changed_rx) = mpsc::channel(1);
        let (route_updated_tx, route_updated_rx) = mpsc::channel(1);
        let stop = CancellationToken::new();

        let attempt = Arc::new(Attempt::new(process, params, stop_requested));

        let monitor = tokio::spawn(service.clone().monitor(
            attempt.clone(),
            MonitorChannels {
                state_rx,
                route_changed_tx,
                route_changed_rx,
                route_updated_tx,
                route_updated_rx,
            },
            stop.clone(),
        ));

        // паника в задаче приходит как JoinError, очистка выполняется всегда
        let body = {
            let attempt = attempt.clone();
            let params = params.clone();
            tokio::spawn(async move { service.attempt_body(&attempt, &params, state_tx).await })
        };

        let result = match body.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!("Паника при подключении: {}", message);
                Err(Error::Panic(message))
            }
            Err(e) => Err(Error::Other(format!("задача подключения прервана: {}", e))),
        };

        self.teardown(&attempt, stop, monitor, done_tx).await;
        result
    }

    async fn attempt_body(
        &self,
        attempt: &Attempt,
        params: &ConnectionParams,
        state_tx: mpsc::Sender<StateInfo>,
    ) -> Result<()> {
        if self.required_state.get() == RequiredState::Disconnect {
            info!("Подключение отменено");
            return Ok(());
        }

        {
            let _setup = self.setup_lock.lock().await;

            info!("Инициализация подключения...");
            attempt.process.init().await.map_err(|e| {
                error!("Не удалось инициализировать VPN процесс: {}", e);
                e
            })?;

            let mut session_info = VpnSessionInfo::default();
            match self.net_info.outbound_ip(false).await {
                Ok(ip) => session_info.outbound_ipv4 = Some(ip),
                Err(e) => warn!("Не удалось определить исходящий IPv4: {}", e),
            }
            match self.net_info.outbound_ip(true).await {
                Ok(ip) => session_info.outbound_ipv6 = Some(ip),
                Err(e) => warn!("Не удалось определить исходящий IPv6: {}", e),
            }
            *self.session_info.lock().await = session_info;

            info!("Инициализация firewall");
            self.firewall.on_change_dns(None).await?;

            // firewall_on важнее firewall_on_during_connection
            if params.firewall_on {
                if !self.firewall.get_enabled().await? {
                    self.set_kill_switch_state(true).await?;
                }
            } else if params.firewall_on_during_connection && !self.firewall.get_enabled().await? {
                attempt.firewall_auto_enabled.store(true, Ordering::SeqCst);
                self.set_kill_switch_state(true).await?;
            }

            attempt.exceptions_added.store(true, Ordering::SeqCst);
            self.firewall
                .add_hosts_to_exceptions(&attempt.destinations, false, false)
                .await?;

            info!("Инициализация DNS");
            self.dns.apply_user_settings().await?;

            // настройки DNS могли измениться с прошлой попытки
            let dns = match self.resolve_dns().await {
                Ok(dns) => self.apply_manual_dns(attempt.process.as_ref(), &dns).await,
                Err(e) => Err(e),
            };
            dns.map_err(|e| {
                error!("Не удалось установить DNS: {}", e);
                Error::Dns(format!("не удалось установить DNS: {}", e))
            })?;
        }

        // отключение, пришедшее во время подготовки, процесс уже не увидит
        if attempt.stop_requested.is_cancelled()
            || self.required_state.get() == RequiredState::Disconnect
        {
            info!("Отключение запрошено до запуска VPN процесса");
            return Ok(());
        }

        info!("Запуск VPN процесса");
        attempt.process.connect(state_tx).await.map_err(|e| {
            error!("Ошибка VPN процесса: {}", e);
            e
        })
    }

    /// Завершение попытки, порядок шагов обратный подготовке
    async fn teardown(
        &self,
        attempt: &Attempt,
        stop: CancellationToken,
        monitor: JoinHandle<()>,
        done_tx: watch::Sender<bool>,
    ) {
        let setup = self.setup_lock.lock().await;
        *attempt.closing.lock().await = true;

        self.detector.uninit();

        if let Err(e) = self.firewall.on_change_dns(None).await {
            error!("(остановка) не удалось удалить правило DNS: {}", e);
        }

        if let Err(e) = self.firewall.client_disconnected().await {
            error!("(остановка) ошибка уведомления firewall об отключении: {}", e);
        }

        if attempt.exceptions_added.load(Ordering::SeqCst) {
            if let Err(e) = self
                .firewall
                .remove_hosts_from_exceptions(&attempt.destinations, false, false)
                .await
            {
                error!("(остановка) не удалось удалить исключения: {}", e);
            }
        }

        if attempt.firewall_auto_enabled.load(Ordering::SeqCst) {
            if let Err(e) = self.set_kill_switch_state(false).await {
                error!("(остановка) не удалось выключить firewall: {}", e);
            }
        }

        stop.cancel();

        if let Err(e) = attempt.process.reset_manual_dns().await {
            error!("(остановка) не удалось сбросить DNS: {}", e);
        }

        if let Err(e) = monitor.await {
            error!("Обработчик состояний VPN завершился с ошибкой: {}", e);
        }

        *self.active.lock().await = None;
        drop(setup);

        self.apply_split_tunnel().await;

        done_tx.send_replace(true);
        info!("VPN процесс остановлен");
    }

    /// Обработчик состояний VPN процесса и изменений маршрутизации
    async fn monitor(
        self: Arc<Self>,
        attempt: Arc<Attempt>,
        channels: MonitorChannels,
        stop: CancellationToken,
    ) {
        let MonitorChannels {
            mut state_rx,
            route_changed_tx,
            mut route_changed_rx,
            route_updated_tx,
            mut route_updated_rx,
        } = channels;

        info!("Обработчик состояний VPN запущен");

        let mut watch_default_route = true;
        loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => break,

                Some(state) = state_rx.recv() => {
                    let state = attempt.decorate(state);
                    self.on_state(&attempt, &state, &route_changed_tx, &route_updated_tx)
                        .await;
                    self.events.on_vpn_state_changed(state).await;
                }

                Some(()) = route_changed_rx.recv(), if watch_default_route => {
                    if attempt.process.is_paused() {
                        info!("Изменение маршрута проигнорировано: подключение на паузе");
                    } else {
                        // отключение приводит к переподключению во внешнем цикле
                        info!("Маршрут по умолчанию ушёл с интерфейса VPN, переподключение...");
                        watch_default_route = false;
                        let service = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = service.disconnect_active().await {
                                error!("Ошибка переподключения: {}", e);
                            }
                        });
                    }
                }

                Some(()) = route_updated_rx.recv() => {
                    if let Err(e) = attempt.process.on_routing_changed().await {
                        error!("Ошибка обработки изменения маршрутов: {}", e);
                    }
                    let dns = self.dns.clone();
                    tokio::spawn(async move {
                        let _ = dns.update_if_wrong_settings().await;
                    });
                }
            }
        }

        // оставшиеся состояния только пересылаются
        while let Ok(state) = state_rx.try_recv() {
            let state = attempt.decorate(state);
            info!("Состояние: {}", state);
            self.events.on_vpn_state_changed(state).await;
        }

        info!("Обработчик состояний VPN остановлен");
    }

    async fn on_state(
        &self,
        attempt: &Attempt,
        state: &StateInfo,
        route_changed_tx: &mpsc::Sender<()>,
        route_updated_tx: &mpsc::Sender<()>,
    ) {
        info!("Состояние: {}", state);

        let closing = attempt.closing.lock().await;
        if *closing {
            return;
        }

        match state.state {
            VpnState::Reconnecting => {
                self.detector.uninit();

                // часть платформ удаляет исключение сервера после подключения
                if let Err(e) = self
                    .firewall
                    .add_hosts_to_exceptions(&attempt.destinations, false, false)
                    .await
                {
                    error!("Не удалось добавить сервер в исключения firewall: {}", e);
                }
            }

            VpnState::Initialised => {
                let Some(ip) = state.client_ip else {
                    error!("Адрес клиента неизвестен, отслеживание маршрутов не запущено");
                    return;
                };

                match self.net_info.interface_by_ip(ip).await {
                    Err(e) => error!(
                        "Не удалось запустить отслеживание маршрутов: интерфейс {} не найден ({})",
                        ip, e
                    ),
                    Ok(interface) => {
                        if let Err(e) = self.detector.init(
                            route_changed_tx.clone(),
                            route_updated_tx.clone(),
                            interface,
                        ) {
                            error!("Не удалось инициализировать отслеживание маршрутов: {}", e);
                        }

                        if self.prefs.read().await.is_inverse_split_tunneling() {
                            info!("Инверсный split tunnel: маршрут по умолчанию не отслеживается");
                        } else {
                            info!("Запуск отслеживания маршрутов");
                            if let Err(e) = self.detector.start() {
                                error!("Не удалось запустить отслеживание маршрутов: {}", e);
                            }
                        }
                    }
                }
            }

            VpnState::Connected => {
                if self.required_state.promote() {
                    info!("Подключено, при разрыве будет выполнено переподключение");
                }

                if !self.events.is_client_connected().await {
                    info!("VPN подключён");
                }

                if let Err(e) = self
                    .firewall
                    .client_connected(ConnectedClient::from(state))
                    .await
                {
                    error!("Не удалось сообщить firewall о подключении: {}", e);
                }

                // правило DNS уже есть для пользовательского DNS, иначе - DNS туннеля
                if self.firewall.dns_info().await.is_none() {
                    if let Some(ip) = attempt.process.default_dns() {
                        if let Err(e) = self
                            .firewall
                            .on_change_dns(Some(DnsSettings::from_ip(ip)))
                            .await
                        {
                            error!("Не удалось добавить правило DNS: {}", e);
                        }
                    }
                }

                {
                    let mut session_info = self.session_info.lock().await;
                    session_info.vpn_local_ipv4 = state.client_ip;
                    session_info.vpn_local_ipv6 = state.client_ipv6;
                }

                self.apply_split_tunnel().await;
            }

            _ => {}
        }
    }

    /// Остановить активный туннель и дождаться завершения попытки
    pub(super) async fn disconnect_active(&self) -> Result<()> {
        let Some(active) = self.active.lock().await.clone() else {
            return Ok(());
        };

        if self.required_state.get() == RequiredState::KeepConnection {
            info!("Отключение (с переподключением)...");
        } else {
            info!("Отключение...");
        }

        self.detector.stop();
        active.stop_requested.cancel();

        active
            .process
            .disconnect()
            .await
            .map_err(|e| Error::Process(format!("не удалось отключить VPN: {}", e)))?;

        let mut done = active.done;
        let _ = done.wait_for(|finished| *finished).await.map(|_| ());
        Ok(())
    }
}
