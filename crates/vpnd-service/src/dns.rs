//! Управление DNS
//!
//! Этот модуль отвечает за:
//! - Интерфейс платформенной настройки DNS ([`DnsBackend`])
//! - Учёт последнего установленного пользовательского DNS

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use vpnd_core::{DnsEncryptionAbilities, DnsSettings, Result};

/// Платформенная настройка DNS
#[async_trait]
pub trait DnsBackend: Send + Sync {
    /// Установить DNS сервер
    ///
    /// `local_ip` - адрес интерфейса туннеля (нужен не на всех платформах).
    async fn set_manual(&self, dns: &DnsSettings, local_ip: Option<IpAddr>) -> Result<()>;

    /// Вернуть исходные настройки DNS
    async fn delete_manual(&self, local_ip: Option<IpAddr>) -> Result<()>;

    /// Временно вернуть исходные настройки (пауза)
    async fn pause(&self) -> Result<()>;

    /// Вернуть настройки после паузы
    async fn resume(&self, default_dns: &DnsSettings) -> Result<()>;

    /// Поддержка DoH/DoT
    fn encryption_abilities(&self) -> Result<DnsEncryptionAbilities>;

    /// Перечитать пользовательский способ управления DNS
    async fn apply_user_settings(&self) -> Result<()>;

    /// Проверить и при необходимости восстановить настройки DNS
    async fn update_if_wrong_settings(&self) -> Result<()>;
}

/// Сервис DNS поверх платформенной реализации
pub struct Dns {
    backend: Arc<dyn DnsBackend>,
    last_manual: Mutex<DnsSettings>,
}

impl Dns {
    /// Создать сервис
    pub fn new(backend: Arc<dyn DnsBackend>) -> Self {
        Self {
            backend,
            last_manual: Mutex::new(DnsSettings::default()),
        }
    }

    /// Установить DNS туннеля по умолчанию (не считается пользовательским)
    pub async fn set_default(&self, dns: &DnsSettings, local_ip: Option<IpAddr>) -> Result<()> {
        let mut last = self.last_manual.lock().await;
        self.backend.set_manual(dns, local_ip).await?;
        *last = DnsSettings::default();
        Ok(())
    }

    /// Установить пользовательский DNS
    pub async fn set_manual(&self, dns: &DnsSettings, local_ip: Option<IpAddr>) -> Result<()> {
        let mut last = self.last_manual.lock().await;
        info!("Установка DNS: {}", dns.info_string());
        self.backend.set_manual(dns, local_ip).await?;
        *last = dns.clone();
        Ok(())
    }

    /// Вернуть исходные настройки DNS
    pub async fn delete_manual(&self, local_ip: Option<IpAddr>) -> Result<()> {
        let mut last = self.last_manual.lock().await;
        self.backend.delete_manual(local_ip).await?;
        *last = DnsSettings::default();
        Ok(())
    }

    /// Пауза: исходные настройки DNS
    pub async fn pause(&self) -> Result<()> {
        self.backend.pause().await
    }

    /// Снятие с паузы
    pub async fn resume(&self, default_dns: &DnsSettings) -> Result<()> {
        self.backend.resume(default_dns).await
    }

    /// Поддержка DoH/DoT
    pub fn encryption_abilities(&self) -> Result<DnsEncryptionAbilities> {
        self.backend.encryption_abilities()
    }

    /// Перечитать пользовательский способ управления DNS
    pub async fn apply_user_settings(&self) -> Result<()> {
        self.backend.apply_user_settings().await
    }

    /// Проверить настройки DNS после изменения маршрутов
    pub async fn update_if_wrong_settings(&self) -> Result<()> {
        if let Err(e) = self.backend.update_if_wrong_settings().await {
            warn!("Не удалось восстановить настройки DNS: {}", e);
            return Err(e);
        }
        Ok(())
    }

    /// Последний установленный пользовательский DNS
    pub async fn last_manual_dns(&self) -> DnsSettings {
        self.last_manual.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockDnsBackend;

    #[tokio::test]
    async fn test_last_manual_dns() {
        let backend = Arc::new(MockDnsBackend::default());
        let dns = Dns::new(backend.clone());
        let manual = DnsSettings::from_ip("1.1.1.1".parse().unwrap());

        dns.set_manual(&manual, None).await.unwrap();
        assert_eq!(dns.last_manual_dns().await, manual);
        assert_eq!(backend.current(), Some(manual));

        dns.delete_manual(None).await.unwrap();
        assert!(dns.last_manual_dns().await.is_empty());
        assert_eq!(backend.current(), None);
    }

    #[tokio::test]
    async fn test_default_is_not_manual() {
        let backend = Arc::new(MockDnsBackend::default());
        let dns = Dns::new(backend.clone());
        let default = DnsSettings::from_ip("172.16.0.1".parse().unwrap());

        dns.set_manual(&DnsSettings::from_ip("9.9.9.9".parse().unwrap()), None)
            .await
            .unwrap();
        dns.set_default(&default, None).await.unwrap();

        assert!(dns.last_manual_dns().await.is_empty());
        assert_eq!(backend.current(), Some(default));
    }

    #[tokio::test]
    async fn test_failed_set_keeps_previous() {
        let backend = Arc::new(MockDnsBackend::default());
        let dns = Dns::new(backend.clone());
        let first = DnsSettings::from_ip("1.1.1.1".parse().unwrap());
        dns.set_manual(&first, None).await.unwrap();

        backend.fail_next();
        let second = DnsSettings::from_ip("8.8.8.8".parse().unwrap());
        assert!(dns.set_manual(&second, None).await.is_err());
        assert_eq!(dns.last_manual_dns().await, first);
    }
}
