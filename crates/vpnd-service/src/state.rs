//! Требуемое состояние подключения и данные VPN сессии

use std::net::IpAddr;
use std::sync::atomic::{AtomicU8, Ordering};

/// Требуемое состояние подключения
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequiredState {
    /// Подключение не требуется
    Disconnect = 0,
    /// Идёт первая попытка подключения
    Connect = 1,
    /// Туннель был установлен, переподключаться при разрыве
    KeepConnection = 2,
}

impl RequiredState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RequiredState::Connect,
            2 => RequiredState::KeepConnection,
            _ => RequiredState::Disconnect,
        }
    }
}

/// Атомарная ячейка для [`RequiredState`]
#[derive(Debug)]
pub struct RequiredStateCell(AtomicU8);

impl RequiredStateCell {
    /// Новая ячейка в состоянии `Disconnect`
    pub fn new() -> Self {
        Self(AtomicU8::new(RequiredState::Disconnect as u8))
    }

    /// Текущее значение
    pub fn get(&self) -> RequiredState {
        RequiredState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Установить значение
    pub fn set(&self, state: RequiredState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// `Connect` -> `KeepConnection`, из других состояний ничего не меняет
    ///
    /// Возвращает `true`, если значение изменилось.
    pub fn promote(&self) -> bool {
        self.0
            .compare_exchange(
                RequiredState::Connect as u8,
                RequiredState::KeepConnection as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

impl Default for RequiredStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Адреса текущей VPN сессии
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VpnSessionInfo {
    /// Исходящий IPv4 до подключения
    pub outbound_ipv4: Option<IpAddr>,
    /// Исходящий IPv6 до подключения
    pub outbound_ipv6: Option<IpAddr>,
    /// IPv4 адрес в туннеле
    pub vpn_local_ipv4: Option<IpAddr>,
    /// IPv6 адрес в туннеле
    pub vpn_local_ipv6: Option<IpAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote_only_from_connect() {
        let cell = RequiredStateCell::new();
        assert_eq!(cell.get(), RequiredState::Disconnect);
        assert!(!cell.promote());
        assert_eq!(cell.get(), RequiredState::Disconnect);

        cell.set(RequiredState::Connect);
        assert!(cell.promote());
        assert_eq!(cell.get(), RequiredState::KeepConnection);

        // повторное продвижение ничего не меняет
        assert!(!cell.promote());
        assert_eq!(cell.get(), RequiredState::KeepConnection);
    }
}
