//! Подписчики на события сервиса
//!
//! Этот модуль отвечает за:
//! - Регистрацию подписчиков (клиенты UI, консоль)
//! - Рассылку событий сервиса всем подписчикам
//! - Признак "есть подключённый клиент" для остановки VPN при отключении UI

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use vpnd_core::StateInfo;
use vpnd_service::{AccountStatus, EventReceiver};

/// Размер очереди одного подписчика
const SUBSCRIBER_QUEUE: usize = 64;

/// Событие сервиса
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    /// Состояние VPN
    VpnState(StateInfo),
    /// Статус аккаунта
    AccountStatus {
        /// Токен сессии
        session: String,
        /// Статус
        status: AccountStatus,
    },
    /// Изменились настройки kill switch
    KillSwitchChanged,
    /// Изменились настройки split tunnel
    SplitTunnelChanged,
    /// Изменилась сессия
    SessionChanged,
}

/// Реестр подписчиков
pub struct Subscribers {
    subscribers: RwLock<HashMap<u64, Sender<ServiceEvent>>>,
    next_id: AtomicU64,
}

impl Subscribers {
    /// Создать пустой реестр
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Подписаться на события
    pub async fn subscribe(&self) -> (u64, Receiver<ServiceEvent>) {
        let (tx, rx) = async_channel::bounded(SUBSCRIBER_QUEUE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().await.insert(id, tx);
        debug!("Подписчик {} зарегистрирован", id);
        (id, rx)
    }

    /// Отписаться
    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.write().await.remove(&id);
        debug!("Подписчик {} удалён", id);
    }

    /// Количество активных подписчиков
    pub async fn active_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    async fn broadcast(&self, event: ServiceEvent) {
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (id, tx) in subscribers.iter() {
                if tx.is_closed() {
                    closed.push(*id);
                    continue;
                }
                // медленный подписчик теряет событие, сервис не ждёт
                if let Err(e) = tx.try_send(event.clone()) {
                    warn!("Событие для подписчика {} не доставлено: {}", id, e);
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in closed {
                subscribers.remove(&id);
                debug!("Подписчик {} отключился", id);
            }
        }
    }
}

impl Default for Subscribers {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventReceiver for Subscribers {
    async fn on_vpn_state_changed(&self, state: StateInfo) {
        self.broadcast(ServiceEvent::VpnState(state)).await;
    }

    async fn on_account_status(&self, session: &str, status: &AccountStatus) {
        self.broadcast(ServiceEvent::AccountStatus {
            session: session.to_string(),
            status: status.clone(),
        })
        .await;
    }

    async fn on_kill_switch_state_changed(&self) {
        self.broadcast(ServiceEvent::KillSwitchChanged).await;
    }

    async fn on_split_tunnel_status_changed(&self) {
        self.broadcast(ServiceEvent::SplitTunnelChanged).await;
    }

    async fn on_service_session_changed(&self) {
        self.broadcast(ServiceEvent::SessionChanged).await;
    }

    async fn is_client_connected(&self) -> bool {
        self.subscribers
            .read()
            .await
            .values()
            .any(|tx| !tx.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpnd_core::{VpnState, VpnType};

    #[tokio::test]
    async fn test_subscribe_and_broadcast() {
        let subscribers = Subscribers::new();
        assert!(!subscribers.is_client_connected().await);

        let (_id1, rx1) = subscribers.subscribe().await;
        let (_id2, rx2) = subscribers.subscribe().await;
        assert_eq!(subscribers.active_count().await, 2);
        assert!(subscribers.is_client_connected().await);

        let state = StateInfo::new(VpnType::WireGuard, VpnState::Connected, "");
        subscribers.on_vpn_state_changed(state.clone()).await;

        assert_eq!(rx1.recv().await.unwrap(), ServiceEvent::VpnState(state.clone()));
        assert_eq!(rx2.recv().await.unwrap(), ServiceEvent::VpnState(state));
    }

    #[tokio::test]
    async fn test_closed_subscriber_removed() {
        let subscribers = Subscribers::new();
        let (_id, rx) = subscribers.subscribe().await;
        drop(rx);

        assert!(!subscribers.is_client_connected().await);
        subscribers.on_kill_switch_state_changed().await;
        assert_eq!(subscribers.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let subscribers = Subscribers::new();
        let (id, _rx) = subscribers.subscribe().await;
        subscribers.unsubscribe(id).await;
        assert_eq!(subscribers.active_count().await, 0);
    }
}
