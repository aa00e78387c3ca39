//! Маршрутизация ОС
//!
//! Этот модуль отвечает за:
//! - Детектор изменений таблицы маршрутов (периодический опрос `ip route`)
//! - Проверку, что маршрут по умолчанию проходит через VPN интерфейс
//! - Исходящий IP и поиск интерфейса по адресу

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vpnd_core::{Error, Result};
use vpnd_service::{NetInterface, NetworkInfo, RouteChangeDetector};

use crate::shell;

/// Адрес для проверки маршрута по умолчанию
const PROBE_V4: IpAddr = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));
const PROBE_V6: IpAddr = IpAddr::V6(Ipv6Addr::new(0x2606, 0x4700, 0, 0, 0, 0, 0, 0x1111));

/// Источник информации о маршрутах
#[async_trait]
pub trait RouteSource: Send + Sync + 'static {
    /// Снимок таблицы маршрутов (сравнивается с предыдущим)
    async fn snapshot(&self) -> Result<String>;

    /// Интерфейс, через который идёт трафик на `dest`
    async fn interface_for(&self, dest: IpAddr) -> Result<String>;
}

/// Маршруты через утилиту `ip`
pub struct IpRouteSource {
    ip: PathBuf,
}

impl IpRouteSource {
    /// Создать источник
    pub fn new(ip: impl Into<PathBuf>) -> Self {
        Self { ip: ip.into() }
    }
}

impl Default for IpRouteSource {
    fn default() -> Self {
        Self::new("ip")
    }
}

#[async_trait]
impl RouteSource for IpRouteSource {
    async fn snapshot(&self) -> Result<String> {
        let v4 = shell::exec(&self.ip, &["route", "show", "table", "all"]).await?;
        let v6 = shell::exec(&self.ip, &["-6", "route", "show", "table", "all"])
            .await
            .unwrap_or_default();
        Ok(v4 + &v6)
    }

    async fn interface_for(&self, dest: IpAddr) -> Result<String> {
        let dest = dest.to_string();
        let out = shell::exec(&self.ip, &["route", "get", dest.as_str()]).await?;
        parse_route_dev(&out)
            .ok_or_else(|| Error::Other(format!("не удалось разобрать маршрут: {}", out.trim())))
    }
}

/// Имя интерфейса из вывода `ip route get`
///
/// `1.1.1.1 dev wg0 table 51820 src 10.0.0.2 uid 0`
pub fn parse_route_dev(output: &str) -> Option<String> {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "dev" {
            return tokens.next().map(str::to_string);
        }
    }
    None
}

struct Watch {
    route_changed: mpsc::Sender<()>,
    route_updated: mpsc::Sender<()>,
    interface: NetInterface,
}

#[derive(Default)]
struct DetectorState {
    watch: Option<Arc<Watch>>,
    running: Option<CancellationToken>,
}

/// Детектор изменений маршрутизации на основе опроса
pub struct PollingRouteDetector<S: RouteSource = IpRouteSource> {
    source: Arc<S>,
    interval: Duration,
    state: Mutex<DetectorState>,
}

impl PollingRouteDetector<IpRouteSource> {
    /// Детектор поверх `ip route`
    pub fn system(interval: Duration) -> Self {
        Self::new(IpRouteSource::default(), interval)
    }
}

impl<S: RouteSource> PollingRouteDetector<S> {
    /// Создать детектор
    pub fn new(source: S, interval: Duration) -> Self {
        Self {
            source: Arc::new(source),
            interval,
            state: Mutex::new(DetectorState::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, DetectorState>> {
        self.state
            .lock()
            .map_err(|_| Error::Other("состояние детектора маршрутов повреждено".into()))
    }
}

async fn poll_loop<S: RouteSource>(
    source: Arc<S>,
    watch: Arc<Watch>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut last = source.snapshot().await.unwrap_or_default();
    let probe = if watch.interface.address.is_ipv6() {
        PROBE_V6
    } else {
        PROBE_V4
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let current = match source.snapshot().await {
            Ok(s) => s,
            Err(e) => {
                warn!("Не удалось получить таблицу маршрутов: {}", e);
                continue;
            }
        };
        if current == last {
            continue;
        }
        last = current;

        match source.interface_for(probe).await {
            Ok(dev) if dev == watch.interface.name => {
                debug!("Маршруты изменились, маршрут по умолчанию через {}", dev);
                let _ = watch.route_updated.try_send(());
            }
            Ok(dev) => {
                info!(
                    "Маршрут по умолчанию ушёл с {} на {}",
                    watch.interface.name, dev
                );
                let _ = watch.route_changed.try_send(());
            }
            Err(e) => {
                warn!("Маршрут по умолчанию не найден: {}", e);
                let _ = watch.route_changed.try_send(());
            }
        }
    }
    debug!("Детектор маршрутов остановлен");
}

impl<S: RouteSource> RouteChangeDetector for PollingRouteDetector<S> {
    fn init(
        &self,
        route_changed: mpsc::Sender<()>,
        route_updated: mpsc::Sender<()>,
        interface: NetInterface,
    ) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(token) = state.running.take() {
            token.cancel();
        }
        debug!("Детектор маршрутов привязан к {}", interface.name);
        state.watch = Some(Arc::new(Watch {
            route_changed,
            route_updated,
            interface,
        }));
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.running.is_some() {
            return Ok(());
        }
        let watch = state
            .watch
            .clone()
            .ok_or_else(|| Error::Other("детектор маршрутов не инициализирован".into()))?;
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Other(format!("нет tokio runtime: {}", e)))?;

        let token = CancellationToken::new();
        handle.spawn(poll_loop(
            self.source.clone(),
            watch,
            self.interval,
            token.clone(),
        ));
        state.running = Some(token);
        Ok(())
    }

    fn stop(&self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(token) = state.running.take() {
                token.cancel();
            }
        }
    }

    fn uninit(&self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(token) = state.running.take() {
                token.cancel();
            }
            state.watch = None;
        }
    }
}

/// Сетевая информация через сокеты и `ip addr`
pub struct SystemNetInfo {
    ip: PathBuf,
}

impl SystemNetInfo {
    /// Создать с путём к утилите `ip`
    pub fn new(ip: impl Into<PathBuf>) -> Self {
        Self { ip: ip.into() }
    }
}

impl Default for SystemNetInfo {
    fn default() -> Self {
        Self::new("ip")
    }
}

#[async_trait]
impl NetworkInfo for SystemNetInfo {
    async fn outbound_ip(&self, ipv6: bool) -> Result<IpAddr> {
        let (bind, probe): (SocketAddr, SocketAddr) = if ipv6 {
            (
                SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
                SocketAddr::new(PROBE_V6, 53),
            )
        } else {
            (
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
                SocketAddr::new(PROBE_V4, 53),
            )
        };
        // connect для UDP только выбирает маршрут, пакеты не отправляются
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(probe).await?;
        Ok(socket.local_addr()?.ip())
    }

    async fn interface_by_ip(&self, ip: IpAddr) -> Result<NetInterface> {
        let out = shell::exec(&self.ip, &["-o", "addr", "show"]).await?;
        find_interface(&out, ip)
            .ok_or_else(|| Error::Other(format!("интерфейс с адресом {} не найден", ip)))
    }
}

/// Поиск интерфейса в выводе `ip -o addr show`
///
/// `5: wg0    inet 10.0.0.2/32 scope global wg0\       valid_lft forever`
pub fn find_interface(output: &str, ip: IpAddr) -> Option<NetInterface> {
    output.lines().find_map(|line| {
        let mut tokens = line.split_whitespace().skip(1);
        let name = tokens.next()?;
        let family = tokens.next()?;
        if family != "inet" && family != "inet6" {
            return None;
        }
        let address: IpAddr = tokens.next()?.split('/').next()?.parse().ok()?;
        (address == ip).then(|| NetInterface {
            name: name.to_string(),
            address,
        })
    })
}
