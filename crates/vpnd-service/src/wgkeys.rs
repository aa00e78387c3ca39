//! Менеджер ключей WireGuard
//!
//! Этот модуль отвечает за:
//! - Генерацию новых ключей и их регистрацию на сервере
//! - Периодическую смену ключей (проверка не реже раза в 5 минут)
//! - Увеличение паузы после неудачных попыток (5 мин, 10 мин, ... до 1 часа)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vpnd_core::{Error, Result, VpnType, WireGuardKeyPair};

use crate::api::Api;

/// Максимальная пауза между проверками ключей
pub const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Максимальная пауза после неудачных попыток
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Текущие ключи WireGuard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireGuardKeysInfo {
    /// Токен сессии
    pub session: String,
    /// Публичный ключ (пустой - ключей нет)
    pub public_key: String,
    /// Приватный ключ
    pub private_key: String,
    /// Адрес клиента в туннеле
    pub local_ip: String,
    /// Время генерации
    pub generated: Option<DateTime<Utc>>,
    /// Интервал смены
    pub interval: Duration,
}

impl WireGuardKeysInfo {
    /// Время следующей смены ключей
    pub fn next_rotation(&self) -> Option<DateTime<Utc>> {
        let interval = chrono::Duration::from_std(self.interval).ok()?;
        self.generated.map(|g| g + interval)
    }

    fn is_update_needed(&self, now: DateTime<Utc>) -> bool {
        if self.public_key.is_empty() {
            return true;
        }
        match self.next_rotation() {
            Some(due) => due <= now,
            None => true,
        }
    }
}

/// Получатель новых ключей (сервис)
#[async_trait]
pub trait KeysReceiver: Send + Sync {
    /// Текущие ключи
    async fn wireguard_keys(&self) -> WireGuardKeysInfo;

    /// Сохранить новые ключи (пустые значения удаляют ключи)
    async fn on_wireguard_keys_saved(&self, public_key: &str, private_key: &str, local_ip: &str);

    /// Тип активного подключения
    async fn connected_type(&self) -> Option<VpnType>;

    /// Доступ к API заблокирован (причина)
    async fn is_connectivity_blocked(&self) -> Option<String>;

    /// Сервер не нашёл сессию
    async fn on_session_not_found(&self);
}

/// Пауза перед следующей проверкой ключей
pub fn next_check_delay(info: &WireGuardKeysInfo, failed_attempts: u32, now: DateTime<Utc>) -> Duration {
    if failed_attempts > 0 {
        return (MAX_CHECK_INTERVAL * failed_attempts).min(MAX_RETRY_INTERVAL);
    }
    match info.next_rotation() {
        Some(due) if due > now => (due - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(MAX_CHECK_INTERVAL),
        _ => Duration::from_secs(1),
    }
}

/// Менеджер ключей WireGuard
pub struct KeysManager {
    api: Option<Arc<dyn Api>>,
    receiver: OnceLock<Weak<dyn KeysReceiver>>,
    update_lock: tokio::sync::Mutex<()>,
    rotation: Mutex<Option<CancellationToken>>,
}

impl KeysManager {
    /// Создать менеджер (без API ключи не обновляются)
    pub fn new(api: Option<Arc<dyn Api>>) -> Self {
        Self {
            api,
            receiver: OnceLock::new(),
            update_lock: tokio::sync::Mutex::new(()),
            rotation: Mutex::new(None),
        }
    }

    /// Привязать получателя ключей (один раз)
    pub fn init(&self, receiver: Weak<dyn KeysReceiver>) -> Result<()> {
        self.receiver
            .set(receiver)
            .map_err(|_| Error::Other("менеджер ключей WireGuard уже инициализирован".into()))
    }

    fn receiver(&self) -> Result<Arc<dyn KeysReceiver>> {
        self.receiver
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::Other("менеджер ключей WireGuard не инициализирован".into()))
    }

    /// Запустить периодическую смену ключей (перезапускает уже работающую)
    pub fn start_rotation(self: &Arc<Self>) -> Result<()> {
        let receiver = self.receiver()?;
        self.stop_rotation();

        let token = CancellationToken::new();
        match self.rotation.lock() {
            Ok(mut rotation) => *rotation = Some(token.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(token.clone()),
        }

        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let info = receiver.wireguard_keys().await;
            drop(receiver);

            if info.interval.is_zero() {
                error!("Смена ключей WireGuard невозможна: интервал не задан");
                return;
            }
            if info.public_key.is_empty() {
                info!("Активный ключ WireGuard не задан, смена ключей отключена");
                return;
            }

            info!("Смена ключей WireGuard запущена (интервал {:?})", info.interval);
            let mut failed_attempts = 0u32;
            loop {
                let wait = match manager.upgrade() {
                    Some(m) => match m.receiver() {
                        Ok(r) => next_check_delay(&r.wireguard_keys().await, failed_attempts, Utc::now()),
                        Err(_) => break,
                    },
                    None => break,
                };

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                let Some(m) = manager.upgrade() else { break };
                match m.update_keys_if_necessary().await {
                    Ok(_) => failed_attempts = 0,
                    Err(_) => failed_attempts = failed_attempts.saturating_add(1),
                }
            }
            info!("Смена ключей WireGuard остановлена");
        });

        Ok(())
    }

    /// Остановить периодическую смену ключей
    pub fn stop_rotation(&self) {
        let token = match self.rotation.lock() {
            Ok(mut rotation) => rotation.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// Сгенерировать новые ключи независимо от срока
    pub async fn generate_keys(self: &Arc<Self>) -> Result<()> {
        if self.generate(false).await? {
            Ok(())
        } else {
            Err(Error::Other("ключи WireGuard не обновлены".into()))
        }
    }

    /// Обновить ключи, если подошёл срок
    ///
    /// Возвращает `true`, если ключи обновлены.
    pub async fn update_keys_if_necessary(self: &Arc<Self>) -> Result<bool> {
        self.generate(true).await
    }

    async fn generate(self: &Arc<Self>, only_if_necessary: bool) -> Result<bool> {
        let result = self.try_generate(only_if_necessary).await;
        if let Err(e) = &result {
            error!("Не удалось обновить ключи WireGuard: {}", e);
        }
        result
    }

    async fn try_generate(self: &Arc<Self>, only_if_necessary: bool) -> Result<bool> {
        let receiver = self.receiver()?;

        let info = receiver.wireguard_keys().await;
        if only_if_necessary && !info.is_update_needed(Utc::now()) {
            return Ok(false);
        }

        let _guard = self.update_lock.lock().await;

        // пока ждали блокировку, ключи мог обновить другой вызов
        let info = receiver.wireguard_keys().await;
        if only_if_necessary && !info.is_update_needed(Utc::now()) {
            return Ok(false);
        }
        if only_if_necessary && info.interval.is_zero() {
            return Err(Error::Other("интервал смены ключей не задан".into()));
        }

        let rotation_stopped = info.public_key.is_empty();

        info!("Обновление ключей WireGuard...");

        if let Some(reason) = receiver.is_connectivity_blocked().await {
            return Err(Error::Other(reason));
        }

        let api = self
            .api
            .as_ref()
            .ok_or_else(|| Error::Other("API сервера не настроен".into()))?;

        let pair = WireGuardKeyPair::generate(&mut OsRng);

        // активный ключ сообщается серверу только для работающего туннеля WireGuard
        let active_public_key = match receiver.connected_type().await {
            Some(VpnType::WireGuard) => info.public_key.as_str(),
            _ => "",
        };

        let local_ip = match api
            .wireguard_key_set(&info.session, pair.public_key(), active_public_key)
            .await
        {
            Ok(ip) => ip,
            Err(e) => {
                if info.public_key.is_empty() {
                    receiver.on_wireguard_keys_saved("", "", "").await;
                }
                warn!("Ключи WireGuard не обновлены: {}", e);
                if e.is_session_not_found() {
                    receiver.on_session_not_found().await;
                    return Err(Error::Other(
                        "ключи WireGuard не обновлены (сессия не найдена)".into(),
                    ));
                }
                return Err(Error::Api(e));
            }
        };

        info!("✓ Ключи WireGuard обновлены ({}:{})", local_ip, pair.public_key());
        receiver
            .on_wireguard_keys_saved(pair.public_key(), pair.private_key(), &local_ip.to_string())
            .await;

        if rotation_stopped {
            self.start_rotation()?;
        }

        Ok(true)
    }
}
