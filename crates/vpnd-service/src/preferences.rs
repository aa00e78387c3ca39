//! Настройки сервиса и данные сессии
//!
//! Этот модуль отвечает за:
//! - Настройки firewall и split tunnel
//! - Данные сессии (учётные данные VPN, ключи WireGuard)
//! - Статус аккаунта
//! - Хранилище настроек ([`PreferencesStore`])

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use vpnd_core::Result;

use crate::api::SessionStatusResponse;

/// Интервал смены ключей WireGuard по умолчанию (7 дней)
pub const DEFAULT_WG_KEYS_REGEN_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Данные сессии
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Идентификатор аккаунта
    #[serde(default)]
    pub account_id: String,
    /// Токен сессии
    #[serde(default)]
    pub session: String,
    /// Имя пользователя OpenVPN
    #[serde(default)]
    pub openvpn_user: String,
    /// Пароль OpenVPN
    #[serde(default)]
    pub openvpn_pass: String,
    /// Публичный ключ WireGuard (base64)
    #[serde(default)]
    pub wg_public_key: String,
    /// Приватный ключ WireGuard (base64)
    #[serde(default)]
    pub wg_private_key: String,
    /// Preshared ключ WireGuard (base64, может отсутствовать)
    #[serde(default)]
    pub wg_preshared_key: String,
    /// Адрес клиента в туннеле WireGuard
    #[serde(default)]
    pub wg_local_ip: String,
    /// Время генерации ключей (unix время, 0 - не генерировались)
    #[serde(default)]
    pub wg_key_generated: i64,
    /// Интервал смены ключей (секунды)
    #[serde(default = "default_regen_interval")]
    pub wg_keys_regen_interval_secs: u64,
}

fn default_regen_interval() -> u64 {
    DEFAULT_WG_KEYS_REGEN_INTERVAL.as_secs()
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            session: String::new(),
            openvpn_user: String::new(),
            openvpn_pass: String::new(),
            wg_public_key: String::new(),
            wg_private_key: String::new(),
            wg_preshared_key: String::new(),
            wg_local_ip: String::new(),
            wg_key_generated: 0,
            wg_keys_regen_interval_secs: default_regen_interval(),
        }
    }
}

impl SessionStatus {
    /// Пользователь авторизован
    pub fn is_logged_in(&self) -> bool {
        !self.session.trim().is_empty()
    }

    /// Учётные данные WireGuard заданы
    pub fn is_wg_credentials_ok(&self) -> bool {
        !self.wg_private_key.is_empty() && !self.wg_local_ip.is_empty()
    }

    /// Интервал смены ключей
    pub fn wg_keys_regen_interval(&self) -> Duration {
        Duration::from_secs(self.wg_keys_regen_interval_secs)
    }

    /// Время генерации ключей
    pub fn wg_key_generated_at(&self) -> Option<DateTime<Utc>> {
        if self.wg_key_generated <= 0 {
            return None;
        }
        Utc.timestamp_opt(self.wg_key_generated, 0).single()
    }

    /// Обновить ключи WireGuard (пустые значения удаляют ключи)
    pub fn update_wg_credentials(
        &mut self,
        public_key: &str,
        private_key: &str,
        local_ip: &str,
        now: DateTime<Utc>,
    ) {
        self.wg_public_key = public_key.to_string();
        self.wg_private_key = private_key.to_string();
        self.wg_local_ip = local_ip.to_string();
        self.wg_key_generated = if public_key.is_empty() {
            0
        } else {
            now.timestamp()
        };
    }

    /// Выход: сбросить всё, кроме интервала смены ключей
    pub fn cleared(&self) -> Self {
        Self {
            wg_keys_regen_interval_secs: self.wg_keys_regen_interval_secs,
            ..Self::default()
        }
    }
}

/// Статус аккаунта
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatus {
    /// Аккаунт активен
    #[serde(default)]
    pub active: bool,
    /// Активен до (unix время)
    #[serde(default)]
    pub active_until: i64,
    /// Тарифный план
    #[serde(default)]
    pub current_plan: String,
    /// Пробный период
    #[serde(default)]
    pub is_free_trial: bool,
}

impl AccountStatus {
    /// Подписка истекла
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() > self.active_until
    }
}

impl From<SessionStatusResponse> for AccountStatus {
    fn from(resp: SessionStatusResponse) -> Self {
        Self {
            active: resp.active,
            active_until: resp.active_until,
            current_plan: resp.current_plan,
            is_free_trial: resp.is_free_trial,
        }
    }
}

/// Настройки сервиса
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Firewall включён постоянно
    #[serde(default)]
    pub is_fw_persistent: bool,
    /// Firewall пропускает локальную сеть
    #[serde(default)]
    pub is_fw_allow_lan: bool,
    /// Firewall пропускает multicast в локальной сети
    #[serde(default)]
    pub is_fw_allow_lan_multicast: bool,
    /// Firewall пропускает API серверы
    #[serde(default)]
    pub is_fw_allow_api_servers: bool,
    /// Останавливать демон, когда клиент UI отключился
    #[serde(default)]
    pub is_stop_on_client_disconnect: bool,
    /// Split tunnel включён
    #[serde(default)]
    pub is_split_tunnel: bool,
    /// Инверсный split tunnel
    #[serde(default)]
    pub is_split_tunnel_inverse: bool,
    /// Сессия
    #[serde(default)]
    pub session: SessionStatus,
    /// Статус аккаунта
    #[serde(default)]
    pub account: AccountStatus,
}

impl Preferences {
    /// Активен инверсный split tunnel
    pub fn is_inverse_split_tunneling(&self) -> bool {
        self.is_split_tunnel && self.is_split_tunnel_inverse
    }
}

/// Хранилище настроек
pub trait PreferencesStore: Send + Sync {
    /// Загрузить настройки
    fn load(&self) -> Result<Preferences>;

    /// Сохранить настройки
    fn save(&self, prefs: &Preferences) -> Result<()>;
}

/// Хранилище в памяти
#[derive(Default)]
pub struct MemoryPreferencesStore {
    prefs: Mutex<Preferences>,
}

impl MemoryPreferencesStore {
    /// Хранилище с начальными настройками
    pub fn new(prefs: Preferences) -> Self {
        Self {
            prefs: Mutex::new(prefs),
        }
    }
}

impl PreferencesStore for MemoryPreferencesStore {
    fn load(&self) -> Result<Preferences> {
        let prefs = self
            .prefs
            .lock()
            .map_err(|_| vpnd_core::Error::Other("хранилище настроек повреждено".into()))?;
        Ok(prefs.clone())
    }

    fn save(&self, prefs: &Preferences) -> Result<()> {
        let mut stored = self
            .prefs
            .lock()
            .map_err(|_| vpnd_core::Error::Other("хранилище настроек повреждено".into()))?;
        *stored = prefs.clone();
        Ok(())
    }
}
