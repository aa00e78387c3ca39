//! Split tunnel
//!
//! Реализация раздельного туннелирования внешняя, сервис только сообщает ей
//! текущую конфигурацию при каждом изменении состояния VPN.

use async_trait::async_trait;
use vpnd_core::Result;

use crate::state::VpnSessionInfo;

/// Конфигурация split tunnel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitTunnelConfig {
    /// Включён
    pub enabled: bool,
    /// Инверсный режим: через VPN идут только выбранные приложения
    pub inverse: bool,
    /// VPN подключён
    pub vpn_connected: bool,
    /// Адреса текущей VPN сессии
    pub session: VpnSessionInfo,
}

/// Реализация split tunnel
#[async_trait]
pub trait SplitTunnel: Send + Sync {
    /// Применить конфигурацию
    async fn apply_config(&self, config: &SplitTunnelConfig) -> Result<()>;
}

/// Split tunnel не поддерживается
pub struct NoSplitTunnel;

#[async_trait]
impl SplitTunnel for NoSplitTunnel {
    async fn apply_config(&self, _config: &SplitTunnelConfig) -> Result<()> {
        Ok(())
    }
}
