//! Создание VPN процессов

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use vpnd_core::{ConnectionParams, Process, Result};

/// Учётные данные WireGuard из текущей сессии
#[derive(Clone)]
pub struct WireGuardCredentials {
    /// Приватный ключ клиента (base64)
    pub private_key: String,
    /// Preshared ключ (base64, может быть пустым)
    pub preshared_key: String,
    /// Адрес клиента в туннеле
    pub local_ip: IpAddr,
}

impl fmt::Debug for WireGuardCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireGuardCredentials")
            .field("local_ip", &self.local_ip)
            .finish_non_exhaustive()
    }
}

/// Учётные данные для VPN процесса
#[derive(Clone)]
pub enum VpnCredentials {
    /// OpenVPN: имя пользователя и пароль
    OpenVpn {
        /// Имя пользователя
        username: String,
        /// Пароль
        password: String,
    },
    /// WireGuard
    WireGuard(WireGuardCredentials),
}

/// Фабрика VPN процессов
///
/// Вызывается перед каждой попыткой подключения, учётные данные читаются из
/// сессии заново.
pub trait ProcessFactory: Send + Sync {
    /// Создать VPN процесс для выбранного протокола
    fn create(
        &self,
        params: &ConnectionParams,
        credentials: &VpnCredentials,
    ) -> Result<Arc<dyn Process>>;
}
