//! Connection settings, feature selection and the threshold/discovery configuration file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::checks::firewall::FirewallParams;
use crate::checks::firmware::{BusinessParams, FirmwareParams};
use crate::checks::gateway::GatewayParams;
use crate::checks::interfaces::InterfaceParams;
use crate::checks::ipsec::IpsecParams;
use crate::checks::snapshot::SnapshotParams;
use crate::checks::ssl::CertificateParams;
use crate::checks::vip::{CarpParams, VipDiscovery, VipParams};
use crate::error::AgentError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How to reach the OPNsense API.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Base URL of the API, e.g. `https://opnsense.local/api`.
    pub url: String,
    pub key: String,
    pub secret: String,
    pub timeout: Duration,
    pub verify_tls: bool,
}

/// Which groups of endpoints the collector polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Features {
    pub firewall: bool,
    pub firmware: bool,
    pub vip: bool,
    pub gateway: bool,
    pub ipsec: bool,
    pub unbound: bool,
    pub snapshot: bool,
    pub ssl: bool,
    pub interfaces: bool,
}

impl Features {
    /// The set collected when nothing was selected explicitly.
    pub fn legacy() -> Self {
        Features {
            firewall: true,
            firmware: true,
            vip: true,
            gateway: true,
            ipsec: true,
            ..Features::default()
        }
    }

    pub fn all() -> Self {
        Features {
            firewall: true,
            firmware: true,
            vip: true,
            gateway: true,
            ipsec: true,
            unbound: true,
            snapshot: true,
            ssl: true,
            interfaces: true,
        }
    }

    pub fn any(&self) -> bool {
        *self != Features::default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryParams {
    pub vip: VipDiscovery,
}

/// Contents of the configuration file. Every table and key is optional.
///
/// ```toml
/// [gateway]
/// status = "Online"
/// delay = { direction = "upper", warn = 0.1, crit = 0.2 }
///
/// [discovery.vip]
/// discover = "all"
/// group_by = "interface"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub gateway: GatewayParams,
    pub ipsec: IpsecParams,
    pub carp: CarpParams,
    pub vip: VipParams,
    pub snapshot: SnapshotParams,
    pub firmware: FirmwareParams,
    pub business: BusinessParams,
    pub firewall: FirewallParams,
    pub certificate: CertificateParams,
    pub interface: InterfaceParams,
    pub discovery: DiscoveryParams,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let content = fs::read_to_string(path).map_err(|source| AgentError::Read {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| AgentError::Config {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Where the rate state lives unless given explicitly.
pub fn default_state_file() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("opnsense-agent")
        .join("rates.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::vip::{VipDiscoverMode, VipGrouping};
    use crate::{Direction, Levels};

    #[test]
    fn test_features() {
        assert!(!Features::default().any());
        let legacy = Features::legacy();
        assert!(legacy.any());
        assert!(legacy.firmware && legacy.vip && legacy.gateway && legacy.ipsec);
        assert!(!legacy.unbound && !legacy.snapshot && !legacy.ssl && !legacy.interfaces);
        assert!(Features::all().interfaces);
    }

    #[test]
    fn test_parse_config() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            status = "Offline"
            delay = { direction = "upper", warn = 0.5, crit = 1.0 }

            [carp]
            master_levels_lower = { direction = "lower", warn = 3, crit = 2 }

            [discovery.vip]
            discover = "master"
            group_by = "interface"
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.status.as_deref(), Some("Offline"));
        assert_eq!(config.gateway.delay, Some(Levels::upper(0.5, 1.0)));
        assert_eq!(config.gateway.loss, None);
        assert_eq!(
            config.carp.master_levels_lower.map(|l| l.direction),
            Some(Direction::Lower)
        );
        assert_eq!(config.discovery.vip.discover, VipDiscoverMode::Master);
        assert_eq!(config.discovery.vip.group_by, VipGrouping::Interface);
    }

    #[test]
    fn test_empty_and_unknown() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.discovery.vip.discover, VipDiscoverMode::None);
        assert!(toml::from_str::<Config>("[gatway]\nstatus = \"x\"").is_err());
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opnsense.toml");
        fs::write(&path, "[snapshot]\nrunning = \"default\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.snapshot.running.as_deref(), Some("default"));

        let err = Config::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, AgentError::Read { .. }));
    }
}
