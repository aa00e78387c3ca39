//! vpnd - демон VPN клиента
//!
//! Подключение WireGuard/OpenVPN с kill switch и автоматическим переподключением.

use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use vpnd_core::WireGuardKeyPair;
use vpnd_daemon::{
    build_service, DaemonConfig, JsonPreferencesStore, ServiceEvent, Subscribers,
};
use vpnd_service::PreferencesStore;

/// Аргументы командной строки
#[derive(Parser, Debug)]
#[command(name = "vpnd")]
#[command(about = "VPN client daemon", long_about = None)]
struct Args {
    /// Путь к конфигурационному файлу
    #[arg(short, long, default_value = "vpnd.toml")]
    config: PathBuf,

    /// Уровень логирования (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Подкоманды
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Подключиться и поддерживать подключение
    Connect,

    /// Генерация примера конфигурации
    GenerateConfig {
        /// Путь для сохранения
        #[arg(short, long, default_value = "vpnd.toml")]
        output: PathBuf,
    },

    /// Сгенерировать пару ключей WireGuard
    Keygen,

    /// Показать сохранённое состояние сессии и kill switch
    Status,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match &args.command {
        Some(Commands::GenerateConfig { output }) => {
            if let Err(e) = generate_config(output) {
                eprintln!("Ошибка генерации конфигурации: {}", e);
                std::process::exit(1);
            }
            println!("Конфигурация сохранена в: {}", output.display());
            return;
        }
        Some(Commands::Keygen) => {
            let pair = WireGuardKeyPair::generate(&mut OsRng);
            println!("PrivateKey = {}", pair.private_key());
            println!("PublicKey  = {}", pair.public_key());
            return;
        }
        Some(Commands::Status) | Some(Commands::Connect) | None => {}
    }

    // Загрузка конфигурации
    let config = match DaemonConfig::from_file(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            if !args.config.exists() {
                println!("⚠ Конфигурационный файл не найден: {}", args.config.display());
                println!("📝 Создание конфигурации по умолчанию...");

                if let Err(gen_err) = generate_config(&args.config) {
                    eprintln!("Ошибка создания конфигурации: {}", gen_err);
                    std::process::exit(1);
                }

                println!("✓ Конфигурация создана: {}", args.config.display());
                println!();
                println!("📋 Необходимые действия:");
                println!("  1. Укажите серверы WireGuard или OpenVPN");
                println!("  2. Заполните секцию [session] (токен, учётные данные, ключ WireGuard)");
                println!("  3. Запустите демон снова: sudo vpnd");
                println!();
                std::process::exit(0);
            } else {
                eprintln!("Ошибка загрузки конфигурации: {}", e);
                eprintln!("Проверьте файл: {}", args.config.display());
                std::process::exit(1);
            }
        }
    };

    if let Some(Commands::Status) = args.command {
        if let Err(e) = print_status(&config) {
            eprintln!("Ошибка чтения состояния: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // Инициализация логирования
    let log_level = args
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .parse::<Level>()
        .unwrap_or(Level::INFO);

    if let Err(e) = init_logging(&config, log_level) {
        eprintln!("Не удалось настроить логирование: {}", e);
        std::process::exit(1);
    }

    // wg-quick, openvpn и resolv.conf требуют root
    #[cfg(unix)]
    {
        if !nix::unistd::Uid::effective().is_root() {
            eprintln!("Ошибка: Требуются права root для управления VPN интерфейсами");
            eprintln!("Запустите: sudo vpnd");
            std::process::exit(1);
        }
    }

    info!("╔═══════════════════════════════════════════════════╗");
    info!("║              vpnd v{}                          ║", env!("CARGO_PKG_VERSION"));
    info!("╚═══════════════════════════════════════════════════╝");

    info!("Конфигурация:");
    info!("  • Протокол: {}", config.connection.protocol);
    info!(
        "  • Серверы: WireGuard {}, OpenVPN {}",
        config.connection.wireguard_hosts.len(),
        config.connection.openvpn_hosts.len()
    );
    info!("  • Kill switch на время подключения: {}", config.connection.firewall_on_during_connection);
    info!("  • Настройки: {}", config.paths.preferences.display());

    if let Err(e) = run_daemon(config).await {
        error!("Критическая ошибка демона: {:#}", e);
        std::process::exit(1);
    }
}

/// Настроить tracing (консоль или файл)
fn init_logging(config: &DaemonConfig, level: Level) -> anyhow::Result<()> {
    if config.logging.log_to_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.log_file_path)?;
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_thread_ids(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// Запуск демона
async fn run_daemon(config: DaemonConfig) -> anyhow::Result<()> {
    let params = config.connection_params()?;
    let subscribers = Arc::new(Subscribers::new());
    let service = build_service(&config, subscribers.clone()).await?;

    // консоль как подписчик событий
    let (console_id, events) = subscribers.subscribe().await;
    let console = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ServiceEvent::VpnState(state) => info!("Состояние VPN: {}", state),
                ServiceEvent::AccountStatus { status, .. } => {
                    info!("Статус аккаунта: активен = {}", status.active)
                }
                ServiceEvent::KillSwitchChanged => info!("Настройки kill switch изменены"),
                ServiceEvent::SplitTunnelChanged => info!("Настройки split tunnel изменены"),
                ServiceEvent::SessionChanged => info!("Сессия изменена"),
            }
        }
    });

    info!("Подключение...");
    let mut connection = {
        let service = service.clone();
        tokio::spawn(async move { service.connect(params).await })
    };

    tokio::select! {
        result = &mut connection => {
            match result {
                Ok(Ok(())) => info!("Подключение завершено"),
                Ok(Err(e)) => error!("Ошибка подключения: {}", e),
                Err(e) => error!("Задача подключения аварийно завершилась: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Получен сигнал Ctrl+C, отключение...");
            if let Err(e) = service.disconnect().await {
                warn!("Ошибка отключения: {}", e);
            }
            match connection.await {
                Ok(Err(e)) => warn!("Подключение завершилось с ошибкой: {}", e),
                Err(e) => warn!("Задача подключения аварийно завершилась: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    subscribers.unsubscribe(console_id).await;
    console.abort();

    if !service.preferences().await.is_fw_persistent {
        if let Err(e) = service.set_kill_switch_state(false).await {
            warn!("Не удалось выключить kill switch: {}", e);
        }
    }

    info!("Демон остановлен");
    Ok(())
}

/// Сохранённое состояние
fn print_status(config: &DaemonConfig) -> anyhow::Result<()> {
    let store = JsonPreferencesStore::new(&config.paths.preferences);
    let prefs = store.load()?;
    let session = &prefs.session;

    println!("Настройки: {}", store.path().display());
    println!("Авторизован: {}", if session.is_logged_in() { "да" } else { "нет" });
    println!(
        "Ключ WireGuard: {}",
        if session.wg_public_key.is_empty() {
            "<нет>"
        } else {
            session.wg_public_key.as_str()
        }
    );
    if let Some(generated) = session.wg_key_generated_at() {
        println!("  сгенерирован: {}", generated.to_rfc3339());
        println!(
            "  смена через: {} ч",
            session.wg_keys_regen_interval().as_secs() / 3600
        );
    }
    println!("Kill switch постоянный: {}", prefs.is_fw_persistent);
    println!(
        "Локальная сеть: {} (multicast: {})",
        prefs.is_fw_allow_lan, prefs.is_fw_allow_lan_multicast
    );
    println!(
        "Split tunnel: {} (инверсный: {})",
        prefs.is_split_tunnel, prefs.is_split_tunnel_inverse
    );
    Ok(())
}

/// Генерация примера конфигурации
fn generate_config(path: &Path) -> anyhow::Result<()> {
    DaemonConfig::example().to_file(path)
}
