//! Operating system families and the capability sets built from them.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// An OS family a notification may declare support for.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    MacOs,
    Windows,
    Linux,
}

impl Platform {
    /// Map an OS identifier (as reported by `std::env::consts::OS`) to a
    /// platform. `darwin` is accepted as an alias for macOS.
    pub fn from_os_name(name: &str) -> Option<Self> {
        match name {
            "macos" | "darwin" => Some(Platform::MacOs),
            "windows" => Some(Platform::Windows),
            "linux" => Some(Platform::Linux),
            _ => None,
        }
    }
}

/// The set of platforms a notification instance was told it may use
/// platform-restricted fields for.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct PlatformSupport {
    pub macos: bool,
    pub windows: bool,
    pub linux: bool,
}

impl PlatformSupport {
    pub const NONE: Self = Self {
        macos: false,
        windows: false,
        linux: false,
    };

    pub const ALL: Self = Self {
        macos: true,
        windows: true,
        linux: true,
    };

    #[must_use]
    pub fn with(mut self, platform: Platform) -> Self {
        match platform {
            Platform::MacOs => self.macos = true,
            Platform::Windows => self.windows = true,
            Platform::Linux => self.linux = true,
        }
        self
    }

    pub fn supports(self, platform: Platform) -> bool {
        match platform {
            Platform::MacOs => self.macos,
            Platform::Windows => self.windows,
            Platform::Linux => self.linux,
        }
    }

    /// Every combination of the three flags, `NONE` first.
    pub fn every_combination() -> impl Iterator<Item = Self> {
        (0u8..8).map(|bits| Self {
            macos: bits & 0b001 != 0,
            windows: bits & 0b010 != 0,
            linux: bits & 0b100 != 0,
        })
    }
}

impl FromIterator<Platform> for PlatformSupport {
    fn from_iter<I: IntoIterator<Item = Platform>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

/// The OS the process is running on, normalized so that macOS is always
/// reported as `macos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOs {
    name: &'static str,
}

impl Default for HostOs {
    fn default() -> Self {
        Self::current()
    }
}

impl HostOs {
    pub fn current() -> Self {
        Self::from_os_name(std::env::consts::OS)
    }

    pub fn from_os_name(name: &'static str) -> Self {
        let name = if name == "darwin" { "macos" } else { name };
        Self { name }
    }

    pub fn from_platform(platform: Platform) -> Self {
        let name = match platform {
            Platform::MacOs => "macos",
            Platform::Windows => "windows",
            Platform::Linux => "linux",
        };
        Self { name }
    }

    pub fn name(self) -> &'static str {
        self.name
    }

    /// `None` for hosts outside the three supported families (e.g. freebsd).
    pub fn platform(self) -> Option<Platform> {
        Platform::from_os_name(self.name)
    }
}

/// A notification field that is only honored on some platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Feature {
    Subtitle,
    Icon,
    Timeout,
}

impl Feature {
    /// Platforms whose notification centers honor this field.
    pub fn platforms(self) -> &'static [Platform] {
        match self {
            Feature::Subtitle => &[Platform::MacOs, Platform::Windows],
            Feature::Icon => &[Platform::Linux],
            Feature::Timeout => &[Platform::Windows, Platform::Linux],
        }
    }
}
