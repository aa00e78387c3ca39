//! Интерфейс VPN процесса
//!
//! Один объект [`Process`] соответствует одной попытке подключения.
//! Реализации (OpenVPN, WireGuard) живут в демоне, оркестратор работает
//! только через этот трейт.

use async_trait::async_trait;
use std::net::IpAddr;
use tokio::sync::mpsc;

use crate::dns::DnsSettings;
use crate::error::Result;
use crate::state::{StateInfo, VpnType};

/// VPN процесс (OpenVPN или WireGuard)
///
/// Все методы принимают `&self`: `disconnect` вызывается из другой задачи,
/// пока `connect` ещё выполняется.
#[async_trait]
pub trait Process: Send + Sync {
    /// Тип протокола
    fn vpn_type(&self) -> VpnType;

    /// Подготовка к подключению (удаление интерфейсов, оставшихся после сбоя и т.п.)
    async fn init(&self) -> Result<()>;

    /// Запустить процесс и ждать его завершения
    ///
    /// Изменения состояния отправляются в `state_tx`.
    async fn connect(&self, state_tx: mpsc::Sender<StateInfo>) -> Result<()>;

    /// Остановить процесс (`connect` должен вернуться)
    async fn disconnect(&self) -> Result<()>;

    /// Процесс на паузе
    fn is_paused(&self) -> bool;

    /// Поставить подключение на паузу
    async fn pause(&self) -> Result<()>;

    /// Снять подключение с паузы
    async fn resume(&self) -> Result<()>;

    /// Установить пользовательский DNS
    async fn set_manual_dns(&self, dns: &DnsSettings) -> Result<()>;

    /// Вернуть DNS туннеля по умолчанию
    async fn reset_manual_dns(&self) -> Result<()>;

    /// IP адрес VPN сервера
    fn destination_ip(&self) -> IpAddr;

    /// IPv6 маршрутизируется через туннель
    fn is_ipv6_in_tunnel(&self) -> bool;

    /// Таблица маршрутизации изменилась, но маршрут по умолчанию всё ещё в туннеле
    async fn on_routing_changed(&self) -> Result<()>;

    /// DNS сервер туннеля по умолчанию
    fn default_dns(&self) -> Option<IpAddr>;
}
