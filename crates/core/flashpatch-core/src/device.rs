//! Device descriptors and install locations.

use core::fmt;
use core::str::FromStr;

/// A supported device, as the patcher needs to know it.
///
/// The catalog this comes from is the caller's concern; the core only
/// reads the fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Canonical device id (e.g. `hammerhead`).
    pub id: String,
    /// Bootloader/build codenames this id answers to.
    pub codenames: Vec<String>,
    /// Human-readable device name.
    pub name: String,
    /// Android ABI the helper binaries are built for.
    pub architecture: String,
}

impl Device {
    /// Creates a device with the given id, one matching codename, and the
    /// default `armeabi-v7a` architecture.
    #[must_use]
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            codenames: vec![id.to_string()],
            name: name.to_string(),
            architecture: ARCH_ARMEABI_V7A.to_string(),
        }
    }
}

/// ABI string for 32-bit ARM.
pub const ARCH_ARMEABI_V7A: &str = "armeabi-v7a";
/// ABI string for 64-bit ARM.
pub const ARCH_ARM64_V8A: &str = "arm64-v8a";
/// ABI string for 32-bit x86.
pub const ARCH_X86: &str = "x86";
/// ABI string for 64-bit x86.
pub const ARCH_X86_64: &str = "x86_64";

/// Where the multi-boot manager places a patched ROM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallLocation {
    /// The device's primary ROM slot.
    Primary,
    /// Secondary ROM sharing the system partition.
    Dual,
    /// One of the three fixed multi-boot slots.
    MultiSlot(u8),
    /// A named slot inside the data partition.
    DataSlot(String),
    /// A named slot on the external SD card.
    ExtsdSlot(String),
}

impl fmt::Display for InstallLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Dual => write!(f, "dual"),
            Self::MultiSlot(n) => write!(f, "multi-slot-{n}"),
            Self::DataSlot(id) => write!(f, "data-slot-{id}"),
            Self::ExtsdSlot(id) => write!(f, "extsd-slot-{id}"),
        }
    }
}

/// Error returned when an install-location string does not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLocationParseError {
    input: String,
}

impl fmt::Display for InstallLocationParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized install location: {:?}", self.input)
    }
}

impl std::error::Error for InstallLocationParseError {}

impl FromStr for InstallLocation {
    type Err = InstallLocationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || InstallLocationParseError {
            input: s.to_string(),
        };
        match s {
            "primary" => Ok(Self::Primary),
            "dual" => Ok(Self::Dual),
            _ => {
                if let Some(n) = s.strip_prefix("multi-slot-") {
                    let n: u8 = n.parse().map_err(|_| err())?;
                    if (1..=3).contains(&n) {
                        return Ok(Self::MultiSlot(n));
                    }
                    return Err(err());
                }
                if let Some(id) = s.strip_prefix("data-slot-") {
                    if !id.is_empty() {
                        return Ok(Self::DataSlot(id.to_string()));
                    }
                    return Err(err());
                }
                if let Some(id) = s.strip_prefix("extsd-slot-") {
                    if !id.is_empty() {
                        return Ok(Self::ExtsdSlot(id.to_string()));
                    }
                }
                Err(err())
            }
        }
    }
}
