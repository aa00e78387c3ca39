//! Сборка сервиса из конфигурации
//!
//! Этот модуль отвечает за:
//! - Начальное заполнение настроек из конфигурации (сессия, ключи, firewall)
//! - Создание системных реализаций (DNS, firewall, маршруты, процессы)
//! - Запуск сервиса

use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use vpnd_core::WireGuardKeyPair;
use vpnd_service::{
    Dns, Firewall, NoSplitTunnel, PreferencesStore, Service, ServiceDeps, SessionStatus,
};

use crate::config::DaemonConfig;
use crate::factory::SystemProcessFactory;
use crate::firewall::StateOnlyFirewall;
use crate::prefs_store::JsonPreferencesStore;
use crate::resolvconf::ResolvConfDns;
use crate::routes::{PollingRouteDetector, SystemNetInfo};
use crate::subscribers::Subscribers;

/// Firewall демона не устанавливает правила ОС
const STATE_ONLY_KILL_SWITCH: &str =
    "Kill switch без правил ОС: firewall только хранит состояние и не блокирует трафик";

/// Заполнить настройки из конфигурации
///
/// Сессия из конфигурации записывается, только если пользователь ещё не
/// авторизован или токен изменился. Сохранённые ключи WireGuard не
/// перезаписываются тем же ключом, время генерации не сбрасывается.
pub fn seed_preferences(store: &dyn PreferencesStore, config: &DaemonConfig) -> anyhow::Result<()> {
    let mut prefs = store.load().context("не удалось загрузить настройки")?;

    prefs.is_fw_persistent = config.firewall.persistent;
    prefs.is_fw_allow_lan = config.firewall.allow_lan;
    prefs.is_fw_allow_lan_multicast = config.firewall.allow_lan_multicast;
    prefs.is_fw_allow_api_servers = config.firewall.allow_api_servers;
    prefs.is_split_tunnel = config.split_tunnel.enabled;
    prefs.is_split_tunnel_inverse = config.split_tunnel.inverse;
    prefs.session.wg_keys_regen_interval_secs = config.key_rotation_interval().as_secs();

    let seed = &config.session;
    if !seed.token.trim().is_empty() && prefs.session.session != seed.token {
        let mut session = SessionStatus {
            session: seed.token.clone(),
            openvpn_user: seed.openvpn_user.clone(),
            openvpn_pass: seed.openvpn_pass.clone(),
            wg_keys_regen_interval_secs: prefs.session.wg_keys_regen_interval_secs,
            ..SessionStatus::default()
        };
        if !seed.wg_private_key.is_empty() {
            let pair = WireGuardKeyPair::from_private(&seed.wg_private_key)
                .context("некорректный приватный ключ WireGuard в конфигурации")?;
            session.update_wg_credentials(
                pair.public_key(),
                pair.private_key(),
                &seed.wg_local_ip,
                Utc::now(),
            );
        }
        prefs.session = session;
        info!("Сессия взята из конфигурации");
    }

    store.save(&prefs).context("не удалось сохранить настройки")?;
    Ok(())
}

/// Создать и инициализировать сервис
pub async fn build_service(
    config: &DaemonConfig,
    subscribers: Arc<Subscribers>,
) -> anyhow::Result<Arc<Service>> {
    let store = Arc::new(JsonPreferencesStore::new(&config.paths.preferences));
    seed_preferences(store.as_ref(), config)?;

    let dns = Arc::new(Dns::new(Arc::new(ResolvConfDns::new(
        &config.paths.resolv_conf,
    ))));
    let firewall = Arc::new(Firewall::new(Arc::new(StateOnlyFirewall::new())));
    warn!("{}", STATE_ONLY_KILL_SWITCH);
    let factory = Arc::new(SystemProcessFactory::new(
        dns.clone(),
        config.paths.clone(),
    ));

    let service = Service::new(ServiceDeps {
        firewall,
        dns,
        detector: Arc::new(PollingRouteDetector::system(config.route_poll_interval())),
        net_info: Arc::new(SystemNetInfo::default()),
        events: subscribers,
        split_tunnel: Arc::new(NoSplitTunnel),
        factory,
        api: None,
        preferences: store,
        anti_tracker: Arc::new(config.anti_tracker.clone()),
    })
    .context("не удалось создать сервис")?;

    service.init().await.context("не удалось инициализировать сервис")?;
    Ok(service)
}
