//! DNS через /etc/resolv.conf
//!
//! Этот модуль отвечает за:
//! - Резервную копию исходного resolv.conf перед первой заменой
//! - Запись `nameserver` для DNS туннеля или пользовательского DNS
//! - Восстановление исходного файла при отключении и на паузе

use async_trait::async_trait;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use vpnd_core::{DnsEncryption, DnsEncryptionAbilities, DnsSettings, Error, Result};
use vpnd_service::DnsBackend;

/// Заголовок файла, записанного демоном
const GENERATED_HEADER: &str = "# Generated by vpnd";

/// DNS бэкенд поверх resolv.conf
pub struct ResolvConfDns {
    path: PathBuf,
    backup: PathBuf,
    current: Mutex<Option<DnsSettings>>,
}

impl ResolvConfDns {
    /// Создать бэкенд для указанного файла (копия хранится рядом с суффиксом `.vpnd-backup`)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut backup = path.clone().into_os_string();
        backup.push(".vpnd-backup");
        Self {
            path,
            backup: PathBuf::from(backup),
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> Option<DnsSettings> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    fn set_current(&self, dns: Option<DnsSettings>) {
        if let Ok(mut current) = self.current.lock() {
            *current = dns;
        }
    }

    async fn write(&self, ip: IpAddr) -> Result<()> {
        if !exists(&self.backup).await {
            if exists(&self.path).await {
                tokio::fs::copy(&self.path, &self.backup).await?;
                debug!("Резервная копия {} создана", self.path.display());
            } else {
                tokio::fs::write(&self.backup, b"").await?;
            }
        }
        tokio::fs::write(&self.path, render(ip)).await?;
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        if exists(&self.backup).await {
            tokio::fs::copy(&self.backup, &self.path).await?;
        }
        Ok(())
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

fn render(ip: IpAddr) -> String {
    format!("{}\nnameserver {}\n", GENERATED_HEADER, ip)
}

fn dns_ip(dns: &DnsSettings) -> Result<IpAddr> {
    if dns.encryption != DnsEncryption::None {
        return Err(Error::Dns(
            "шифрование DNS не поддерживается resolv.conf".into(),
        ));
    }
    dns.ip()
        .ok_or_else(|| Error::Dns(format!("некорректный адрес DNS: {}", dns.dns_host)))
}

#[async_trait]
impl DnsBackend for ResolvConfDns {
    async fn set_manual(&self, dns: &DnsSettings, _local_ip: Option<IpAddr>) -> Result<()> {
        let ip = dns_ip(dns)?;
        self.write(ip).await?;
        self.set_current(Some(dns.clone()));
        info!("✓ DNS установлен: {}", ip);
        Ok(())
    }

    async fn delete_manual(&self, _local_ip: Option<IpAddr>) -> Result<()> {
        self.set_current(None);
        if exists(&self.backup).await {
            tokio::fs::rename(&self.backup, &self.path).await?;
            info!("✓ Исходный DNS восстановлен");
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.restore().await
    }

    async fn resume(&self, default_dns: &DnsSettings) -> Result<()> {
        match self.current() {
            Some(dns) => self.write(dns_ip(&dns)?).await,
            None if !default_dns.is_empty() => self.set_manual(default_dns, None).await,
            None => Ok(()),
        }
    }

    fn encryption_abilities(&self) -> Result<DnsEncryptionAbilities> {
        Ok(DnsEncryptionAbilities::default())
    }

    async fn apply_user_settings(&self) -> Result<()> {
        Ok(())
    }

    async fn update_if_wrong_settings(&self) -> Result<()> {
        let Some(dns) = self.current() else {
            return Ok(());
        };
        let ip = dns_ip(&dns)?;
        let content = tokio::fs::read_to_string(&self.path).await.unwrap_or_default();
        if content != render(ip) {
            warn!("resolv.conf изменён извне, восстановление DNS {}", ip);
            tokio::fs::write(&self.path, render(ip)).await?;
        }
        Ok(())
    }
}
