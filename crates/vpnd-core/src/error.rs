//! Типы ошибок демона vpnd
//!
//! Этот модуль содержит все типы ошибок, которые могут возникнуть
//! при управлении VPN подключением.

use thiserror::Error;

/// Код ошибки API: сессия не найдена на сервере
pub const API_SESSION_NOT_FOUND: u32 = 601;

/// Код ошибки API: аккаунт не активен
pub const API_ACCOUNT_NOT_ACTIVE: u32 = 702;

/// Основной тип ошибок демона
#[derive(Error, Debug)]
pub enum Error {
    /// Пользователь не авторизован
    #[error("Пользователь не авторизован")]
    NotLoggedIn,

    /// VPN процесс запросил переподключение (без задержки)
    #[error("Требуется переподключение: {0}")]
    ReconnectionRequired(String),

    /// Ошибка VPN процесса
    #[error("Ошибка VPN процесса: {0}")]
    Process(String),

    /// Ошибка аутентификации VPN процесса
    #[error("Ошибка аутентификации VPN: {0}")]
    Authentication(String),

    /// Ошибка firewall
    #[error("Ошибка firewall: {0}")]
    Firewall(String),

    /// Ошибка настройки DNS
    #[error("Ошибка DNS: {0}")]
    Dns(String),

    /// Некорректные параметры подключения
    #[error("Некорректные параметры подключения: {0}")]
    InvalidParams(String),

    /// Ошибка запроса к API
    #[error("Ошибка API: {0}")]
    Api(#[from] ApiError),

    /// Ошибка работы с ключами WireGuard
    #[error("Ошибка ключей WireGuard: {0}")]
    Keys(#[from] KeyError),

    /// Паника в задаче подключения
    #[error("Паника при подключении: {0}")]
    Panic(String),

    /// Ошибка ввода-вывода
    #[error("Ошибка I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Общая ошибка
    #[error("Общая ошибка: {0}")]
    Other(String),
}

impl Error {
    /// VPN процесс просит немедленно переподключиться
    pub fn is_reconnection_required(&self) -> bool {
        matches!(self, Error::ReconnectionRequired(_))
    }

    /// Ошибка API с указанным кодом
    pub fn api_code(&self) -> Option<u32> {
        match self {
            Error::Api(e) => Some(e.code),
            _ => None,
        }
    }
}

/// Ошибка, возвращённая API сервером
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("код {code}: {message}")]
pub struct ApiError {
    /// Код ошибки (0 для сетевых ошибок)
    pub code: u32,
    /// Сообщение сервера
    pub message: String,
}

impl ApiError {
    /// Создать ошибку API
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Сессия не найдена на сервере
    pub fn is_session_not_found(&self) -> bool {
        self.code == API_SESSION_NOT_FOUND
    }

    /// Аккаунт не активен
    pub fn is_account_not_active(&self) -> bool {
        self.code == API_ACCOUNT_NOT_ACTIVE
    }
}

/// Ошибки ключей WireGuard
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Строка не является base64
    #[error("Ключ не является base64 строкой")]
    InvalidBase64,

    /// Некорректный размер ключа
    #[error("Некорректный размер ключа: ожидается {expected}, получено {actual}")]
    InvalidKeySize { expected: usize, actual: usize },
}

/// Псевдоним для Result с ошибкой демона
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
