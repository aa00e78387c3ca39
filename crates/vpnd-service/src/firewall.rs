//! Firewall (kill switch)
//!
//! Этот модуль отвечает за:
//! - Интерфейс платформенного firewall ([`FirewallBackend`])
//! - Состояние подключённого клиента и паузы
//! - Повторное уведомление о подключённом клиенте после включения firewall
//! - Правило для DNS сервера

use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use vpnd_core::{DnsSettings, Error, Result, StateInfo};

/// Платформенная реализация firewall
///
/// Синтаксис правил остаётся на стороне реализации.
pub trait FirewallBackend: Send + Sync {
    /// Включить/выключить firewall
    fn set_enabled(&self, enable: bool) -> Result<()>;

    /// Состояние firewall
    fn get_enabled(&self) -> Result<bool>;

    /// Постоянный режим (firewall не выключается при отключении VPN)
    fn set_persistent(&self, persistent: bool) -> Result<()>;

    /// Разрешить трафик подключённого VPN клиента
    fn client_connected(&self, client: &ConnectedClient) -> Result<()>;

    /// Удалить правила подключённого клиента
    fn client_disconnected(&self) -> Result<()>;

    /// Разрешить обмен с указанными хостами
    ///
    /// Непостоянные исключения удаляются после отключения клиента.
    fn add_hosts_to_exceptions(&self, ips: &[IpAddr], only_icmp: bool, persistent: bool)
        -> Result<()>;

    /// Удалить хосты из исключений
    fn remove_hosts_from_exceptions(
        &self,
        ips: &[IpAddr],
        only_icmp: bool,
        persistent: bool,
    ) -> Result<()>;

    /// Разрешить/запретить локальную сеть
    fn allow_lan(&self, allow_lan: bool, allow_multicast: bool) -> Result<()>;

    /// Правило для DNS сервера (`None` - удалить правило)
    fn set_dns(&self, dns: Option<&DnsSettings>) -> Result<()>;
}

/// Параметры подключённого VPN клиента
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedClient {
    /// IPv4 адрес клиента в туннеле
    pub local_ip: Option<IpAddr>,
    /// IPv6 адрес клиента в туннеле
    pub local_ipv6: Option<IpAddr>,
    /// Локальный порт
    pub client_port: u16,
    /// IP адрес сервера
    pub server_ip: Option<IpAddr>,
    /// Порт сервера
    pub server_port: u16,
    /// TCP соединение
    pub is_tcp: bool,
}

impl From<&StateInfo> for ConnectedClient {
    fn from(state: &StateInfo) -> Self {
        Self {
            local_ip: state.client_ip,
            local_ipv6: state.client_ipv6,
            client_port: state.client_port,
            server_ip: state.server_ip,
            server_port: state.server_port,
            is_tcp: state.is_tcp,
        }
    }
}

#[derive(Default)]
struct FirewallState {
    client: Option<ConnectedClient>,
    paused: bool,
    dns: Option<DnsSettings>,
}

/// Сервис firewall поверх платформенной реализации
pub struct Firewall {
    backend: Arc<dyn FirewallBackend>,
    state: Mutex<FirewallState>,
}

impl Firewall {
    /// Создать сервис
    pub fn new(backend: Arc<dyn FirewallBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(FirewallState::default()),
        }
    }

    /// Включить/выключить firewall
    pub async fn set_enabled(&self, enable: bool) -> Result<()> {
        let state = self.state.lock().await;

        if enable {
            info!("Включение firewall...");
        } else {
            info!("Выключение firewall...");
        }

        if let Err(e) = self.backend.set_enabled(enable) {
            error!("Не удалось изменить состояние firewall: {}", e);
            return Err(Error::Firewall(format!(
                "не удалось изменить состояние firewall: {}",
                e
            )));
        }

        // Включение -> подключение -> выключение -> включение:
        // клиент всё ещё подключён, правила нужно вернуть (но не на паузе)
        if enable && !state.paused {
            if let Some(client) = &state.client {
                if let Err(e) = self.backend.client_connected(client) {
                    error!("Не удалось восстановить правила клиента: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Состояние firewall
    pub async fn get_enabled(&self) -> Result<bool> {
        let _state = self.state.lock().await;
        self.backend.get_enabled().map_err(|e| {
            error!("Не удалось получить состояние firewall: {}", e);
            e
        })
    }

    /// Постоянный режим
    pub async fn set_persistent(&self, persistent: bool) -> Result<()> {
        let _state = self.state.lock().await;
        info!("Постоянный режим firewall: {}", persistent);
        self.backend.set_persistent(persistent)
    }

    /// VPN подключение поставлено на паузу
    pub async fn client_paused(&self) {
        self.state.lock().await.paused = true;
    }

    /// VPN подключение снято с паузы
    pub async fn client_resumed(&self) {
        self.state.lock().await.paused = false;
    }

    /// Клиент на паузе
    pub async fn is_client_paused(&self) -> bool {
        self.state.lock().await.paused
    }

    /// VPN клиент подключён: разрешить его трафик
    pub async fn client_connected(&self, client: ConnectedClient) -> Result<()> {
        let mut state = self.state.lock().await;
        state.paused = false;

        info!("Клиент подключён: {:?}", client.local_ip);
        let result = self.backend.client_connected(&client);
        state.client = Some(client);

        if let Err(e) = &result {
            error!("Ошибка настройки правил клиента: {}", e);
        }
        result
    }

    /// VPN клиент отключён: удалить его правила
    pub async fn client_disconnected(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.paused = false;

        if state.client.take().is_none() {
            return Ok(());
        }

        info!("Клиент отключён");
        self.backend.client_disconnected().map_err(|e| {
            error!("Ошибка удаления правил клиента: {}", e);
            e
        })
    }

    /// Клиент подключён
    pub async fn connected_client(&self) -> Option<ConnectedClient> {
        self.state.lock().await.client.clone()
    }

    /// Добавить хосты в исключения
    pub async fn add_hosts_to_exceptions(
        &self,
        ips: &[IpAddr],
        only_icmp: bool,
        persistent: bool,
    ) -> Result<()> {
        let _state = self.state.lock().await;
        self.backend
            .add_hosts_to_exceptions(ips, only_icmp, persistent)
            .map_err(|e| {
                error!("Не удалось добавить хосты в исключения: {}", e);
                e
            })
    }

    /// Удалить хосты из исключений
    pub async fn remove_hosts_from_exceptions(
        &self,
        ips: &[IpAddr],
        only_icmp: bool,
        persistent: bool,
    ) -> Result<()> {
        let _state = self.state.lock().await;
        self.backend
            .remove_hosts_from_exceptions(ips, only_icmp, persistent)
            .map_err(|e| {
                error!("Не удалось удалить хосты из исключений: {}", e);
                e
            })
    }

    /// Разрешить/запретить локальную сеть
    pub async fn allow_lan(&self, allow_lan: bool, allow_multicast: bool) -> Result<()> {
        let _state = self.state.lock().await;
        info!("allowLan:{} allowMulticast:{}", allow_lan, allow_multicast);
        self.backend.allow_lan(allow_lan, allow_multicast)
    }

    /// DNS сервер изменился (`None` - удалить правило)
    pub async fn on_change_dns(&self, dns: Option<DnsSettings>) -> Result<()> {
        let mut state = self.state.lock().await;
        let dns = dns.filter(|d| !d.is_empty());
        self.backend.set_dns(dns.as_ref())?;
        state.dns = dns;
        Ok(())
    }

    /// Текущее правило для DNS (`None` - правила нет)
    pub async fn dns_info(&self) -> Option<DnsSettings> {
        self.state.lock().await.dns.clone()
    }
}
