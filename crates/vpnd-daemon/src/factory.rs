//! Создание системных VPN процессов (wg-quick, openvpn)

use std::sync::Arc;
use tracing::debug;
use vpnd_core::{ConnectionParams, Error, Process, Result, VpnType};
use vpnd_service::{Dns, ProcessFactory, VpnCredentials};

use crate::config::PathsConfig;
use crate::openvpn::{OpenVpnProcess, OpenVpnSettings};
use crate::wireguard::{WireGuardProcess, WireGuardSettings};

/// Фабрика процессов ОС
pub struct SystemProcessFactory {
    dns: Arc<Dns>,
    paths: PathsConfig,
}

impl SystemProcessFactory {
    /// Создать фабрику
    pub fn new(dns: Arc<Dns>, paths: PathsConfig) -> Self {
        Self { dns, paths }
    }
}

impl ProcessFactory for SystemProcessFactory {
    fn create(
        &self,
        params: &ConnectionParams,
        credentials: &VpnCredentials,
    ) -> Result<Arc<dyn Process>> {
        match (params.vpn_type, credentials) {
            (VpnType::WireGuard, VpnCredentials::WireGuard(creds)) => {
                let host = params
                    .wireguard
                    .entry_hosts
                    .first()
                    .cloned()
                    .ok_or_else(|| Error::InvalidParams("не задан сервер WireGuard".into()))?;
                debug!("WireGuard процесс для {}", host.host);

                let settings = WireGuardSettings {
                    wg_quick: self.paths.wg_quick.clone(),
                    config_path: self.paths.wg_config.clone(),
                    host,
                    port: params.wireguard.port,
                    mtu: params.wireguard.mtu,
                };
                let process = WireGuardProcess::new(settings, creds.clone(), self.dns.clone())?;
                Ok(Arc::new(process))
            }
            (VpnType::OpenVpn, VpnCredentials::OpenVpn { username, password }) => {
                let host = params
                    .openvpn
                    .entry_hosts
                    .first()
                    .cloned()
                    .ok_or_else(|| Error::InvalidParams("не задан сервер OpenVPN".into()))?;
                debug!("OpenVPN процесс для {}", host.host);

                let settings = OpenVpnSettings {
                    binary: self.paths.openvpn.clone(),
                    config_path: self.paths.openvpn_config.clone(),
                    extra_config: self.paths.openvpn_extra_config.clone(),
                    host,
                    port: params.openvpn.port,
                    is_tcp: params.openvpn.is_tcp,
                    proxy: params.openvpn.proxy.clone(),
                    exit_server_id: params.openvpn.exit_server_id.clone(),
                };
                let process = OpenVpnProcess::new(
                    settings,
                    username.clone(),
                    password.clone(),
                    self.dns.clone(),
                )?;
                Ok(Arc::new(process))
            }
            (vpn_type, _) => Err(Error::InvalidParams(format!(
                "учётные данные не соответствуют протоколу {:?}",
                vpn_type
            ))),
        }
    }
}
