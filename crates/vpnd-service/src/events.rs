//! Получатель событий сервиса (клиенты UI)

use async_trait::async_trait;
use vpnd_core::StateInfo;

use crate::preferences::AccountStatus;

/// Получатель событий сервиса
#[async_trait]
pub trait EventReceiver: Send + Sync {
    /// Состояние VPN изменилось
    async fn on_vpn_state_changed(&self, state: StateInfo);

    /// Получен статус аккаунта
    async fn on_account_status(&self, session: &str, status: &AccountStatus);

    /// Изменились настройки kill switch
    async fn on_kill_switch_state_changed(&self);

    /// Изменились настройки split tunnel
    async fn on_split_tunnel_status_changed(&self);

    /// Изменилась сессия (вход/выход, ключи WireGuard)
    async fn on_service_session_changed(&self);

    /// Подключён ли хотя бы один клиент UI
    async fn is_client_connected(&self) -> bool;
}
