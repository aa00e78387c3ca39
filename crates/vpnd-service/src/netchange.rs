//! Отслеживание изменений сети
//!
//! Этот модуль отвечает за:
//! - Интерфейс детектора изменений маршрутизации
//! - Интерфейс получения сетевой информации (исходящий IP, интерфейс по IP)

use async_trait::async_trait;
use std::net::IpAddr;
use tokio::sync::mpsc;
use vpnd_core::Result;

/// Сетевой интерфейс
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    /// Имя интерфейса (wg0, tun0, ...)
    pub name: String,
    /// Адрес интерфейса
    pub address: IpAddr,
}

/// Детектор изменений маршрутизации
///
/// После `init` детектор отправляет в `route_changed` сигнал, когда маршрут по
/// умолчанию ушёл с защищаемого интерфейса, и в `route_updated`, когда маршруты
/// изменились, но маршрут по умолчанию остался на интерфейсе. Каналы с ёмкостью 1,
/// сигналы отправляются без ожидания (`try_send`).
pub trait RouteChangeDetector: Send + Sync {
    /// Привязать детектор к интерфейсу
    fn init(
        &self,
        route_changed: mpsc::Sender<()>,
        route_updated: mpsc::Sender<()>,
        interface: NetInterface,
    ) -> Result<()>;

    /// Начать отслеживание
    fn start(&self) -> Result<()>;

    /// Остановить отслеживание
    fn stop(&self);

    /// Остановить отслеживание и забыть интерфейс
    fn uninit(&self);
}

/// Сетевая информация ОС
#[async_trait]
pub trait NetworkInfo: Send + Sync {
    /// Исходящий IP адрес (через маршрут по умолчанию)
    async fn outbound_ip(&self, ipv6: bool) -> Result<IpAddr>;

    /// Интерфейс, которому назначен адрес
    async fn interface_by_ip(&self, ip: IpAddr) -> Result<NetInterface>;
}
