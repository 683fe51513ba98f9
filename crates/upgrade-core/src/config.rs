use crate::error::{Result, UpgradeError};
use crate::types::{Architecture, ReSlot};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "upgrade.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// PerArch
// ---------------------------------------------------------------------------

/// A filename per image architecture. An empty or absent entry means the
/// image is not required for that architecture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerArch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit32: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit64: Option<String>,
}

impl PerArch {
    pub fn new(bit32: &str, bit64: &str) -> Self {
        Self {
            bit32: Some(bit32.to_string()),
            bit64: Some(bit64.to_string()),
        }
    }

    pub fn for_arch(&self, arch: Architecture) -> Option<&str> {
        let name = match arch {
            Architecture::Bit32 => self.bit32.as_deref(),
            Architecture::Bit64 => self.bit64.as_deref(),
        };
        name.map(str::trim).filter(|n| !n.is_empty())
    }

    /// Every configured filename, regardless of architecture.
    pub fn configured(&self) -> impl Iterator<Item = &str> {
        Architecture::all()
            .iter()
            .filter_map(move |arch| self.for_arch(*arch))
    }

    pub fn is_empty(&self) -> bool {
        self.configured().next().is_none()
    }
}

// ---------------------------------------------------------------------------
// ImagesConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Local directory holding the approved images.
    pub repository: PathBuf,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
    #[serde(default = "default_preserve_dir")]
    pub preserve_dir: String,
    pub main: PerArch,
    #[serde(default, skip_serializing_if = "PerArch::is_empty")]
    pub two_stage: PerArch,
    /// Major version (text before the first `.`) that requires the intermediate image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_stage_for: Option<String>,
    #[serde(default, skip_serializing_if = "PerArch::is_empty")]
    pub patch: PerArch,
    #[serde(default = "default_sixty_four_bit_models")]
    pub sixty_four_bit_re_models: Vec<String>,
}

fn default_scratch_dir() -> String {
    "/var/tmp/".to_string()
}

fn default_preserve_dir() -> String {
    "/var/preserve/".to_string()
}

fn default_sixty_four_bit_models() -> Vec<String> {
    [
        "RE-S-1800x2-8G",
        "RE-S-1800x2-16G",
        "RE-S-1800x4-8G",
        "RE-S-1800x4-16G",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl ImagesConfig {
    pub fn local_path(&self, filename: &str) -> PathBuf {
        self.repository.join(filename)
    }

    /// Every image file the run could need, across both architectures.
    pub fn all_filenames(&self) -> Vec<&str> {
        self.main
            .configured()
            .chain(self.two_stage.configured())
            .chain(self.patch.configured())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// EnhancedIpConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedIpConfig {
    /// Model prefixes whose network-services mode is checked.
    #[serde(default = "default_families")]
    pub families: Vec<String>,
    #[serde(default = "default_required_mode")]
    pub required_mode: String,
    /// Line-card description prefixes that cannot run in the required mode.
    #[serde(default = "default_incompatible_cards")]
    pub incompatible_cards: Vec<String>,
}

fn default_families() -> Vec<String> {
    vec!["MX".to_string()]
}

fn default_required_mode() -> String {
    "Enhanced-IP".to_string()
}

fn default_incompatible_cards() -> Vec<String> {
    vec!["DPC".to_string()]
}

impl Default for EnhancedIpConfig {
    fn default() -> Self {
        Self {
            families: default_families(),
            required_mode: default_required_mode(),
            incompatible_cards: default_incompatible_cards(),
        }
    }
}

impl EnhancedIpConfig {
    pub fn applies_to(&self, family: &str) -> bool {
        self.families.iter().any(|f| f.eq_ignore_ascii_case(family))
    }

    pub fn blocking_cards<'a>(&self, cards: &'a [String]) -> Vec<&'a str> {
        cards
            .iter()
            .filter(|card| {
                self.incompatible_cards
                    .iter()
                    .any(|prefix| card.trim_start().starts_with(prefix.as_str()))
            })
            .map(String::as_str)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// RedundancyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedundancyConfig {
    #[serde(default = "default_preferred_master")]
    pub preferred_master: ReSlot,
}

fn default_preferred_master() -> ReSlot {
    ReSlot::Re0
}

impl Default for RedundancyConfig {
    fn default() -> Self {
        Self {
            preferred_master: default_preferred_master(),
        }
    }
}

// ---------------------------------------------------------------------------
// TimingConfig
// ---------------------------------------------------------------------------

/// Wait schedule for the disruptive steps, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_reboot_delay")]
    pub reboot_initial_delay_secs: u64,
    #[serde(default = "default_reboot_interval")]
    pub reboot_poll_interval_secs: u64,
    #[serde(default = "default_switchover_delay")]
    pub switchover_initial_delay_secs: u64,
    #[serde(default = "default_switchover_interval")]
    pub switchover_poll_interval_secs: u64,
    #[serde(default = "default_settle")]
    pub re_settle_secs: u64,
    #[serde(default = "default_replication_interval")]
    pub replication_poll_interval_secs: u64,
}

fn default_reboot_delay() -> u64 {
    120
}

fn default_reboot_interval() -> u64 {
    30
}

fn default_switchover_delay() -> u64 {
    15
}

fn default_switchover_interval() -> u64 {
    10
}

fn default_settle() -> u64 {
    20
}

fn default_replication_interval() -> u64 {
    120
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reboot_initial_delay_secs: default_reboot_delay(),
            reboot_poll_interval_secs: default_reboot_interval(),
            switchover_initial_delay_secs: default_switchover_delay(),
            switchover_poll_interval_secs: default_switchover_interval(),
            re_settle_secs: default_settle(),
            replication_poll_interval_secs: default_replication_interval(),
        }
    }
}

impl TimingConfig {
    /// All waits zeroed. Used by tests and simulations.
    pub fn immediate() -> Self {
        Self {
            reboot_initial_delay_secs: 0,
            reboot_poll_interval_secs: 0,
            switchover_initial_delay_secs: 0,
            switchover_poll_interval_secs: 0,
            re_settle_secs: 0,
            replication_poll_interval_secs: 0,
        }
    }

    pub fn reboot(&self) -> crate::poller::RecoveryWait {
        crate::poller::RecoveryWait {
            initial_delay: Duration::from_secs(self.reboot_initial_delay_secs),
            poll_interval: Duration::from_secs(self.reboot_poll_interval_secs),
        }
    }

    pub fn switchover(&self) -> crate::poller::RecoveryWait {
        crate::poller::RecoveryWait {
            initial_delay: Duration::from_secs(self.switchover_initial_delay_secs),
            poll_interval: Duration::from_secs(self.switchover_poll_interval_secs),
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.re_settle_secs)
    }

    pub fn replication_poll(&self) -> Duration {
        Duration::from_secs(self.replication_poll_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// SshConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Upper bound for a single long-running command such as a software add.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_username() -> String {
    "guest".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_command_timeout() -> u64 {
    3600
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            port: default_port(),
            identity_file: None,
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub images: ImagesConfig,
    /// Skips detection when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<Architecture>,
    #[serde(default)]
    pub pre_upgrade: Vec<String>,
    #[serde(default)]
    pub post_upgrade: Vec<String>,
    #[serde(default)]
    pub enhanced_ip: EnhancedIpConfig,
    #[serde(default)]
    pub redundancy: RedundancyConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new(repository: impl Into<PathBuf>, main: PerArch) -> Self {
        Self {
            version: 1,
            images: ImagesConfig {
                repository: repository.into(),
                scratch_dir: default_scratch_dir(),
                preserve_dir: default_preserve_dir(),
                main,
                two_stage: PerArch::default(),
                two_stage_for: None,
                patch: PerArch::default(),
                sixty_four_bit_re_models: default_sixty_four_bit_models(),
            },
            architecture: None,
            pre_upgrade: Vec::new(),
            post_upgrade: Vec::new(),
            enhanced_ip: EnhancedIpConfig::default(),
            redundancy: RedundancyConfig::default(),
            timing: TimingConfig::default(),
            ssh: SshConfig::default(),
            log_file: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(UpgradeError::InvalidConfig(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let images = &self.images;

        // 1. A main image is mandatory for at least one architecture
        if images.main.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "images.main has no filename for either architecture".to_string(),
            });
        }
        for arch in Architecture::all() {
            if images.main.for_arch(*arch).is_none() && !images.main.is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("images.main has no {arch} image; {arch} devices cannot be upgraded"),
                });
            }
        }

        // 2. Two-stage images are useless without a version marker
        let marker = images.two_stage_for.as_deref().map(str::trim).unwrap_or("");
        if !images.two_stage.is_empty() && marker.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "images.two_stage is set but images.two_stage_for is empty; \
                          the intermediate image will never be used"
                    .to_string(),
            });
        }
        if images.two_stage.is_empty() && !marker.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "images.two_stage_for is '{marker}' but no intermediate image is configured"
                ),
            });
        }

        // 3. Intermediate images must not land on the final image's path
        if normalize_dir(&images.scratch_dir) == normalize_dir(&images.preserve_dir) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "images.scratch_dir and images.preserve_dir are the same directory"
                    .to_string(),
            });
        }

        // 4. Empty statement lists are legal but rarely intended
        if self.pre_upgrade.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "pre_upgrade is empty; no traffic will be drained before the upgrade"
                    .to_string(),
            });
        }
        if self.post_upgrade.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "post_upgrade is empty; redundancy features will not be restored"
                    .to_string(),
            });
        }
        for stmt in self.pre_upgrade.iter().chain(&self.post_upgrade) {
            if !is_set_statement(stmt) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("'{stmt}' is not a set/delete/activate/deactivate statement"),
                });
            }
        }

        warnings
    }
}

fn normalize_dir(dir: &str) -> &str {
    dir.trim().trim_end_matches('/')
}

fn is_set_statement(stmt: &str) -> bool {
    let verb = stmt.split_whitespace().next().unwrap_or("");
    matches!(
        verb,
        "set" | "delete" | "activate" | "deactivate" | "insert" | "rename"
    )
}

/// Commented template written by `config init`.
pub const TEMPLATE: &str = r#"# Junos upgrade configuration.
version: 1

images:
  # Directory on this server holding the approved images
  repository: /opt/code/Juniper/Approved/MX/MX960/
  # Where final images are staged on the device
  scratch_dir: /var/tmp/
  # Where intermediate (two-stage) images are staged on the device
  preserve_dir: /var/preserve/
  main:
    bit32: junos-install-mx-x86-32-16.1R6-S1.1.tgz
    bit64: junos-install-mx-x86-64-16.1R6-S1.1.tgz
  # Intermediate image, used when the running major version equals two_stage_for
  two_stage:
    bit32: jinstall-13.3R6-S1.6-domestic-signed.tgz
    bit64: jinstall64-13.3R6-S1.6-domestic-signed.tgz
  two_stage_for: "12"
  # Optional selective patch, installed last without a reboot
  # patch:
  #   bit32: jselective-update-J2-x86-32-16.1R6-S1-J2.tgz
  #   bit64: jselective-update-amd64-J2-x86-64-16.1R6-S1-J2.tgz

# Applied before the first install. PIM nonstop-routing and the MX
# network-services mode are handled automatically.
pre_upgrade:
  - delete chassis redundancy failover
  - delete chassis redundancy graceful-switchover
  - delete routing-options nonstop-routing
  - delete protocols isis overload
  - set protocols isis overload advertise-high-metrics

# Applied after the last install to restore the device.
post_upgrade:
  - set routing-options nonstop-routing
  - set chassis redundancy failover on-loss-of-keepalives
  - set chassis redundancy graceful-switchover
  - delete protocols isis overload
  - set protocols isis overload timeout 600
  - set protocols isis overload advertise-high-metrics

redundancy:
  preferred_master: re0

ssh:
  username: guest
  port: 22
"#;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn template_parses_and_validates() {
        let cfg: Config = serde_yaml::from_str(TEMPLATE).unwrap();
        assert_eq!(cfg.images.two_stage_for.as_deref(), Some("12"));
        assert_eq!(cfg.redundancy.preferred_master, ReSlot::Re0);
        assert_eq!(cfg.pre_upgrade.len(), 5);
        assert!(cfg.images.patch.is_empty());
        let errors: Vec<_> = cfg
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .collect();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let yaml = "images:\n  repository: /srv/images\n  main:\n    bit64: junos-64.tgz\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.images.scratch_dir, "/var/tmp/");
        assert_eq!(cfg.images.preserve_dir, "/var/preserve/");
        assert_eq!(cfg.timing.reboot_initial_delay_secs, 120);
        assert_eq!(cfg.timing.switchover_poll_interval_secs, 10);
        assert_eq!(cfg.ssh.port, 22);
        assert_eq!(cfg.enhanced_ip.required_mode, "Enhanced-IP");
        assert_eq!(cfg.images.main.for_arch(Architecture::Bit64), Some("junos-64.tgz"));
        assert_eq!(cfg.images.main.for_arch(Architecture::Bit32), None);
    }

    #[test]
    fn empty_filename_means_not_required() {
        let per = PerArch {
            bit32: Some("  ".to_string()),
            bit64: None,
        };
        assert!(per.is_empty());
        assert_eq!(per.for_arch(Architecture::Bit32), None);
    }

    #[test]
    fn validate_flags_marker_without_image() {
        let mut cfg = Config::new("/srv", PerArch::new("a32.tgz", "a64.tgz"));
        cfg.images.two_stage_for = Some("12".to_string());
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("two_stage_for")));
    }

    #[test]
    fn validate_flags_bad_statement() {
        let mut cfg = Config::new("/srv", PerArch::new("a32.tgz", "a64.tgz"));
        cfg.pre_upgrade = vec!["show version".to_string()];
        cfg.post_upgrade = vec!["set system host-name r1".to_string()];
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("show version")));
    }

    #[test]
    fn validate_flags_shared_directories() {
        let mut cfg = Config::new("/srv", PerArch::new("a32.tgz", "a64.tgz"));
        cfg.images.preserve_dir = "/var/tmp".to_string();
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.message.contains("same directory")));
    }

    #[test]
    fn blocking_cards_prefix_match() {
        let eip = EnhancedIpConfig::default();
        let cards = vec![
            "MPC7E 3D 40XGE".to_string(),
            "DPCE 40x 1GE R".to_string(),
        ];
        assert_eq!(eip.blocking_cards(&cards), vec!["DPCE 40x 1GE R"]);
        assert!(eip.applies_to("mx"));
        assert!(!eip.applies_to("PTX"));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("upgrade.yaml");
        let mut cfg = Config::new("/srv/images", PerArch::new("a32.tgz", "a64.tgz"));
        cfg.architecture = Some(Architecture::Bit64);
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.architecture, Some(Architecture::Bit64));
        assert_eq!(loaded.images.repository, PathBuf::from("/srv/images"));
    }

    #[test]
    fn load_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, UpgradeError::InvalidConfig(_)));
    }
}
