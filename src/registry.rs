/*
 * SPDX-License-Identifier: MIT
 *
 * Permission is hereby granted, free of charge, to any person obtaining a
 * copy of this software and associated documentation files (the "Software"),
 * to deal in the Software without restriction, including without limitation
 * the rights to use, copy, modify, merge, publish, distribute, sublicense,
 * and/or sell copies of the Software, and to permit persons to whom the
 * Software is furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
 * THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
 * DEALINGS IN THE SOFTWARE.
 */
//! Managed BMC endpoints and fleet power-cycle commands, loaded from TOML.
//!
//! ```toml
//! [power_cycle]
//! shutdown = ["/opt/fleet/shutdown_servers.sh"]
//! power_up = ["/opt/fleet/ilo_powerup_all.sh"]
//!
//! [[targets]]
//! id = "hpv2"
//! base_url = "https://hpv2-ilo"
//! username = "Administrator"
//! password_env = "HPV2_ILO_PASSWORD"
//!
//! [targets.boot]
//! device_path = "PciRoot(0x0)/Pci(0x6,0x0)/Pci(0x0,0x0)/MAC(6CB3118852EC,0x1)/IPv4(0.0.0.0)"
//! ```
use std::{collections::HashSet, fmt, path::Path, path::PathBuf};

use serde::Deserialize;

use crate::{
    model::{
        Boot, BootSourceOverrideEnabled, BootSourceOverrideMode, BootSourceOverrideTarget,
        SetBoot,
    },
    ConfigurationError, Endpoint,
};

pub const DEFAULT_SYSTEM_PATH: &str = "Systems/1/";
const POWER_CYCLE_SECTION: &str = "power_cycle";

/// What to write into a system's boot resource. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootOverrideDescriptor {
    enabled: BootSourceOverrideEnabled,
    target: BootSourceOverrideTarget,
    /// Left to the BMC when unset
    mode: Option<BootSourceOverrideMode>,
    device_path: Option<String>,
}

impl BootOverrideDescriptor {
    pub fn new(
        enabled: BootSourceOverrideEnabled,
        target: BootSourceOverrideTarget,
        device_path: Option<String>,
    ) -> Self {
        Self {
            enabled,
            target,
            mode: None,
            device_path,
        }
    }

    pub fn with_mode(mut self, mode: BootSourceOverrideMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Network boot once from the interface at `device_path`.
    pub fn uefi_once(device_path: &str) -> Self {
        Self::new(
            BootSourceOverrideEnabled::Once,
            BootSourceOverrideTarget::UefiTarget,
            Some(device_path.to_string()),
        )
    }

    pub fn enabled(&self) -> BootSourceOverrideEnabled {
        self.enabled
    }

    pub fn target(&self) -> BootSourceOverrideTarget {
        self.target
    }

    pub fn mode(&self) -> Option<BootSourceOverrideMode> {
        self.mode
    }

    pub fn device_path(&self) -> Option<&str> {
        self.device_path.as_deref()
    }

    /// The PATCH body for the system resource.
    pub fn to_patch(&self) -> SetBoot {
        SetBoot {
            boot: Boot {
                boot_source_override_enabled: Some(self.enabled),
                boot_source_override_target: Some(self.target),
                boot_source_override_mode: self.mode,
                uefi_target_boot_source_override: self.device_path.clone(),
            },
        }
    }
}

impl fmt::Display for BootOverrideDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.enabled, self.target)?;
        if let Some(p) = &self.device_path {
            write!(f, " {p}")?;
        }
        Ok(())
    }
}

/// One managed BMC
#[derive(Clone, PartialEq, Eq)]
pub struct Target {
    pub id: String,
    pub base_url: String,
    pub username: String,
    password: String,
    /// Relative to the Redfish service root
    pub system_path: String,
    pub boot: BootOverrideDescriptor,
}

impl Target {
    pub fn new(
        id: &str,
        base_url: &str,
        username: &str,
        password: &str,
        boot: BootOverrideDescriptor,
    ) -> Self {
        Self {
            id: id.to_string(),
            base_url: base_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            system_path: DEFAULT_SYSTEM_PATH.to_string(),
            boot,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            base_url: self.base_url.clone(),
            user: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("system_path", &self.system_path)
            .field("boot", &self.boot)
            .finish()
    }
}

/// Targets in declaration order
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: Vec<Target>,
}

impl TargetRegistry {
    pub fn new(targets: Vec<Target>) -> Result<Self, ConfigurationError> {
        if targets.is_empty() {
            return Err(ConfigurationError::NoTargets);
        }
        let mut seen = HashSet::new();
        for t in &targets {
            if !seen.insert(t.id.as_str()) {
                return Err(ConfigurationError::DuplicateTarget(t.id.clone()));
            }
        }
        Ok(Self { targets })
    }

    pub fn list_targets(&self) -> &[Target] {
        &self.targets
    }
}

/// External commands that shut down and power up the fleet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerCycleConfig {
    /// argv, first element is the program
    pub shutdown: Vec<String>,
    pub power_up: Vec<String>,
    /// None if no home directory could be found and none was configured
    pub known_hosts: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub registry: TargetRegistry,
    pub power_cycle: PowerCycleConfig,
}

impl FleetConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let s = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&s)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigurationError> {
        Self::from_toml_str_with_env(s, |var| std::env::var(var).ok())
    }

    /// `env` resolves `password_env` references.
    pub fn from_toml_str_with_env<F>(s: &str, env: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(s)?;
        let mut targets = Vec::with_capacity(raw.targets.len());
        for (i, t) in raw.targets.into_iter().enumerate() {
            targets.push(t.into_target(i, &env)?);
        }
        let registry = TargetRegistry::new(targets)?;
        let power_cycle = raw
            .power_cycle
            .ok_or_else(|| missing(POWER_CYCLE_SECTION, "power_cycle"))?
            .into_config()?;
        Ok(Self {
            registry,
            power_cycle,
        })
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    targets: Vec<RawTarget>,
    power_cycle: Option<RawPowerCycle>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTarget {
    id: Option<String>,
    base_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    password_env: Option<String>,
    system_path: Option<String>,
    boot: Option<RawBoot>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBoot {
    enabled: Option<BootSourceOverrideEnabled>,
    target: Option<BootSourceOverrideTarget>,
    mode: Option<BootSourceOverrideMode>,
    device_path: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPowerCycle {
    shutdown: Option<Vec<String>>,
    power_up: Option<Vec<String>>,
    known_hosts: Option<String>,
}

fn missing(section: &str, field: &str) -> ConfigurationError {
    ConfigurationError::MissingField {
        section: section.to_string(),
        field: field.to_string(),
    }
}

fn invalid(section: &str, field: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        section: section.to_string(),
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// Empty strings count as missing
fn required(v: Option<String>, section: &str, field: &str) -> Result<String, ConfigurationError> {
    match v {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(missing(section, field)),
    }
}

impl RawTarget {
    fn into_target<F>(self, index: usize, env: &F) -> Result<Target, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let id = required(self.id, &format!("targets[{index}]"), "id")?;
        let section = format!("targets.{id}");
        let base_url = required(self.base_url, &section, "base_url")?;
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(invalid(
                &section,
                "base_url",
                "must start with https:// or http://",
            ));
        }
        let username = required(self.username, &section, "username")?;
        let password = match (self.password, self.password_env) {
            (Some(_), Some(_)) => {
                return Err(invalid(
                    &section,
                    "password",
                    "set only one of password and password_env",
                ))
            }
            (Some(p), None) => p,
            (None, Some(var)) => env(&var).ok_or(ConfigurationError::MissingEnv {
                section: section.clone(),
                var,
            })?,
            (None, None) => return Err(missing(&section, "password")),
        };
        let password = required(Some(password), &section, "password")?;

        let boot = self.boot.ok_or_else(|| missing(&section, "boot"))?;
        let enabled = boot.enabled.unwrap_or_default();
        if enabled == BootSourceOverrideEnabled::InvalidValue {
            return Err(invalid(&section, "boot.enabled", "unknown value"));
        }
        let target = boot.target.unwrap_or_default();
        if target == BootSourceOverrideTarget::InvalidValue {
            return Err(invalid(&section, "boot.target", "unknown value"));
        }
        if boot.mode == Some(BootSourceOverrideMode::InvalidValue) {
            return Err(invalid(&section, "boot.mode", "unknown value"));
        }
        let mode = boot.mode;
        let device_path = boot.device_path.filter(|p| !p.trim().is_empty());
        if target == BootSourceOverrideTarget::UefiTarget && device_path.is_none() {
            return Err(missing(&section, "boot.device_path"));
        }

        Ok(Target {
            id,
            base_url,
            username,
            password,
            system_path: self
                .system_path
                .unwrap_or_else(|| DEFAULT_SYSTEM_PATH.to_string()),
            boot: BootOverrideDescriptor {
                enabled,
                target,
                mode,
                device_path,
            },
        })
    }
}

impl RawPowerCycle {
    fn into_config(self) -> Result<PowerCycleConfig, ConfigurationError> {
        let argv = |v: Option<Vec<String>>, field: &str| match v {
            Some(v) if v.first().is_some_and(|p| !p.trim().is_empty()) => Ok(v),
            _ => Err(missing(POWER_CYCLE_SECTION, field)),
        };
        let shutdown = argv(self.shutdown, "shutdown")?;
        let power_up = argv(self.power_up, "power_up")?;
        let known_hosts = match self.known_hosts {
            Some(p) => Some(expand_home(&p)),
            None => home::home_dir().map(|h| h.join(".ssh").join("known_hosts")),
        };
        Ok(PowerCycleConfig {
            shutdown,
            power_up,
            known_hosts,
        })
    }
}

fn expand_home(p: &str) -> PathBuf {
    match (p.strip_prefix("~/"), home::home_dir()) {
        (Some(rest), Some(h)) => h.join(rest),
        _ => PathBuf::from(p),
    }
}
