//! Device identification for license binding.
//!
//! The device identifier is the MAC address of the primary network
//! interface, formatted as `AA:BB:CC:DD:EE:FF`. When no usable interface
//! exists, a locally-administered address is derived from stable host
//! identifiers so the same machine keeps producing the same value.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;
use std::fmt;
use sysinfo::Networks;

/// A stable identifier that binds a license key to this machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Resolves the identifier for the current device.
    #[must_use]
    pub fn current() -> Self {
        match primary_mac() {
            Some(mac) => Self(format_mac(&mac)),
            None => Self(format_mac(&derived_mac())),
        }
    }

    /// Wraps an already-known identifier.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into().to_uppercase())
    }

    /// Returns the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Formats six address bytes as colon-separated uppercase hex.
#[must_use]
pub fn format_mac(bytes: &[u8; 6]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Returns the hardware address of the primary network interface.
///
/// Interfaces are ordered by name so the pick is stable across calls.
/// Loopback and all-zero addresses are skipped.
#[must_use]
pub fn primary_mac() -> Option<[u8; 6]> {
    let networks = Networks::new_with_refreshed_list();
    let mut candidates: Vec<(String, [u8; 6])> = networks
        .iter()
        .map(|(name, data)| (name.clone(), data.mac_address().0))
        .filter(|(name, mac)| !is_loopback(name) && mac.iter().any(|b| *b != 0))
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    candidates.into_iter().next().map(|(_, mac)| mac)
}

fn is_loopback(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == "lo" || name.starts_with("lo0") || name.contains("loopback")
}

/// Derives a locally-administered address from host identifiers.
fn derived_mac() -> [u8; 6] {
    let combined = collect_hardware_ids().join("|");
    let hash = Sha256::digest(combined.as_bytes());

    let mut mac = [0u8; 6];
    mac.copy_from_slice(&hash[..6]);
    // Locally administered, unicast.
    mac[0] = (mac[0] | 0x02) & 0xFE;
    mac
}

/// Collects hardware identifiers for the fallback address.
fn collect_hardware_ids() -> Vec<String> {
    let mut ids = vec![env::consts::OS.to_string(), env::consts::ARCH.to_string()];

    ids.push(
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string()),
    );

    if let Some(machine_id) = get_machine_id() {
        ids.push(machine_id);
    }

    if let Ok(user) = env::var("USER").or_else(|_| env::var("USERNAME")) {
        ids.push(user);
    }

    ids
}

/// Gets the machine ID (platform-specific unique identifier).
fn get_machine_id() -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.contains("IOPlatformUUID"))
                    .and_then(|l| l.split('"').nth(3))
                    .map(String::from)
            })
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/machine-id")
            .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
            .ok()
            .map(|s| s.trim().to_string())
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}
