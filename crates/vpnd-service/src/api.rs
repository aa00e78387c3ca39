//! Интерфейс REST API сервера

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use vpnd_core::ApiError;

/// Ответ на запрос статуса сессии
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    /// Аккаунт активен
    pub active: bool,
    /// Активен до (unix время)
    pub active_until: i64,
    /// Тарифный план
    pub current_plan: String,
    /// Пробный период
    pub is_free_trial: bool,
}

/// REST API сервера
#[async_trait]
pub trait Api: Send + Sync {
    /// Статус сессии
    async fn session_status(&self, session: &str) -> Result<SessionStatusResponse, ApiError>;

    /// Зарегистрировать новый публичный ключ WireGuard
    ///
    /// `active_public_key` передаётся только если туннель WireGuard сейчас активен.
    /// Возвращает адрес клиента в туннеле.
    async fn wireguard_key_set(
        &self,
        session: &str,
        new_public_key: &str,
        active_public_key: &str,
    ) -> Result<IpAddr, ApiError>;

    /// Удалить сессию на сервере
    async fn session_delete(&self, session: &str) -> Result<(), ApiError>;

    /// Адреса API серверов (для исключений firewall)
    fn api_addresses(&self) -> Vec<IpAddr>;
}
