//! Firewall без правил ОС
//!
//! Хранит состояние kill switch и исключений, сами правила не устанавливает.
//! Используется там, где фильтрацию настраивает внешний инструмент.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Mutex;
use tracing::{debug, info};
use vpnd_core::{DnsSettings, Error, Result};
use vpnd_service::{ConnectedClient, FirewallBackend};

#[derive(Debug, Default)]
struct Rules {
    enabled: bool,
    persistent: bool,
    client: Option<ConnectedClient>,
    exceptions: HashSet<(IpAddr, bool)>,
    persistent_exceptions: HashSet<(IpAddr, bool)>,
    allow_lan: bool,
    allow_multicast: bool,
    dns: Option<DnsSettings>,
}

/// Firewall, хранящий только состояние
#[derive(Debug, Default)]
pub struct StateOnlyFirewall {
    rules: Mutex<Rules>,
}

impl StateOnlyFirewall {
    /// Создать firewall
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Rules) -> T) -> Result<T> {
        let mut rules = self
            .rules
            .lock()
            .map_err(|_| Error::Firewall("состояние firewall повреждено".into()))?;
        Ok(f(&mut rules))
    }

    /// Хост в исключениях
    pub fn is_exception(&self, ip: IpAddr) -> bool {
        self.with(|r| {
            r.exceptions.iter().any(|(h, _)| *h == ip)
                || r.persistent_exceptions.iter().any(|(h, _)| *h == ip)
        })
        .unwrap_or(false)
    }

    /// Разрешённый DNS
    pub fn dns(&self) -> Option<DnsSettings> {
        self.with(|r| r.dns.clone()).ok().flatten()
    }
}

impl FirewallBackend for StateOnlyFirewall {
    fn set_enabled(&self, enable: bool) -> Result<()> {
        self.with(|r| r.enabled = enable)?;
        info!("Kill switch {}", if enable { "включён" } else { "выключен" });
        Ok(())
    }

    fn get_enabled(&self) -> Result<bool> {
        self.with(|r| r.enabled)
    }

    fn set_persistent(&self, persistent: bool) -> Result<()> {
        self.with(|r| {
            r.persistent = persistent;
            if persistent {
                r.enabled = true;
            }
        })
    }

    fn client_connected(&self, client: &ConnectedClient) -> Result<()> {
        debug!(
            "Firewall: клиент {:?} -> {:?}:{}",
            client.local_ip, client.server_ip, client.server_port
        );
        self.with(|r| r.client = Some(client.clone()))
    }

    fn client_disconnected(&self) -> Result<()> {
        self.with(|r| {
            r.client = None;
            r.exceptions.clear();
        })
    }

    fn add_hosts_to_exceptions(
        &self,
        ips: &[IpAddr],
        only_icmp: bool,
        persistent: bool,
    ) -> Result<()> {
        self.with(|r| {
            let set = if persistent {
                &mut r.persistent_exceptions
            } else {
                &mut r.exceptions
            };
            set.extend(ips.iter().map(|ip| (*ip, only_icmp)));
        })
    }

    fn remove_hosts_from_exceptions(
        &self,
        ips: &[IpAddr],
        only_icmp: bool,
        persistent: bool,
    ) -> Result<()> {
        self.with(|r| {
            let set = if persistent {
                &mut r.persistent_exceptions
            } else {
                &mut r.exceptions
            };
            for ip in ips {
                set.remove(&(*ip, only_icmp));
            }
        })
    }

    fn allow_lan(&self, allow_lan: bool, allow_multicast: bool) -> Result<()> {
        self.with(|r| {
            r.allow_lan = allow_lan;
            r.allow_multicast = allow_multicast;
        })
    }

    fn set_dns(&self, dns: Option<&DnsSettings>) -> Result<()> {
        self.with(|r| r.dns = dns.cloned())
    }
}
