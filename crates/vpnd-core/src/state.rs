//! Состояния VPN подключения
//!
//! Этот модуль отвечает за:
//! - Тип VPN протокола (OpenVPN / WireGuard)
//! - Состояния, которые сообщает VPN процесс
//! - Описание состояния, пересылаемое клиентам (StateInfo)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Тип VPN протокола
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnType {
    /// OpenVPN
    OpenVpn,
    /// WireGuard
    WireGuard,
}

impl fmt::Display for VpnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpnType::OpenVpn => write!(f, "OpenVPN"),
            VpnType::WireGuard => write!(f, "WireGuard"),
        }
    }
}

/// Состояние VPN подключения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VpnState {
    /// Начало подключения
    Connecting,
    /// OpenVPN: ожидание ответа сервера
    Wait,
    /// OpenVPN: аутентификация
    Auth,
    /// OpenVPN: получение конфигурации
    GetConfig,
    /// OpenVPN: назначение IP адреса
    AssignIp,
    /// OpenVPN: добавление маршрутов
    AddRoutes,
    /// OpenVPN: TCP соединение с сервером
    TcpConnect,
    /// Интерфейс туннеля создан, IP назначен
    Initialised,
    /// Туннель установлен
    Connected,
    /// Переподключение
    Reconnecting,
    /// Отключено
    Disconnected,
    /// Процесс завершается
    Exiting,
}

impl VpnState {
    /// Строковое представление состояния
    pub fn as_str(&self) -> &'static str {
        match self {
            VpnState::Connecting => "CONNECTING",
            VpnState::Wait => "WAIT",
            VpnState::Auth => "AUTH",
            VpnState::GetConfig => "GETCONFIG",
            VpnState::AssignIp => "ASSIGNIP",
            VpnState::AddRoutes => "ADDROUTES",
            VpnState::TcpConnect => "TCP_CONNECT",
            VpnState::Initialised => "INITIALISED",
            VpnState::Connected => "CONNECTED",
            VpnState::Reconnecting => "RECONNECTING",
            VpnState::Disconnected => "DISCONNECTED",
            VpnState::Exiting => "EXITING",
        }
    }
}

impl fmt::Display for VpnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Информация о состоянии VPN, пересылаемая клиентам
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateInfo {
    /// Состояние
    pub state: VpnState,
    /// Описание
    pub description: String,
    /// Unix время (секунды)
    pub time: i64,
    /// Тип VPN
    pub vpn_type: VpnType,
    /// IPv4 адрес клиента в туннеле
    pub client_ip: Option<IpAddr>,
    /// IPv6 адрес клиента в туннеле
    pub client_ipv6: Option<IpAddr>,
    /// Локальный порт клиента
    pub client_port: u16,
    /// IP адрес сервера
    pub server_ip: Option<IpAddr>,
    /// Порт сервера
    pub server_port: u16,
    /// TCP соединение
    pub is_tcp: bool,
    /// Поддерживается ли пауза
    pub is_can_pause: bool,
    /// Идентификатор сервера выхода (multihop)
    pub exit_server_id: String,
    /// Ошибка аутентификации
    pub is_auth_error: bool,
}

impl StateInfo {
    /// Создать описание состояния
    pub fn new(vpn_type: VpnType, state: VpnState, description: impl Into<String>) -> Self {
        Self {
            state,
            description: description.into(),
            time: chrono::Utc::now().timestamp(),
            vpn_type,
            client_ip: None,
            client_ipv6: None,
            client_port: 0,
            server_ip: None,
            server_port: 0,
            is_tcp: false,
            is_can_pause: false,
            exit_server_id: String::new(),
            is_auth_error: false,
        }
    }

    /// Установить IP адрес клиента в туннеле
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Установить адрес сервера
    pub fn with_server(mut self, ip: IpAddr, port: u16, is_tcp: bool) -> Self {
        self.server_ip = Some(ip);
        self.server_port = port;
        self.is_tcp = is_tcp;
        self
    }
}

impl fmt::Display for StateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.state, self.vpn_type)?;
        if !self.description.is_empty() {
            write!(f, " {}", self.description)?;
        }
        if let Some(ip) = self.client_ip {
            write!(f, " client={}", ip)?;
        }
        if let Some(ip) = self.server_ip {
            write!(f, " server={}:{}", ip, self.server_port)?;
        }
        Ok(())
    }
}
