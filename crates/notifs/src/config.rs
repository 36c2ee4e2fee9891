use std::path::{Path, PathBuf};

use crate::{
    error::LoadError,
    plugin::{CachePolicy, LoadOptions},
};

/// Explicit library path or `file://` URL.
pub const ENV_PLUGIN: &str = "NOTIFS_PLUGIN";
/// Directory containing the platform-named library.
pub const ENV_PLUGIN_BASE: &str = "NOTIFS_PLUGIN_BASE";
/// Any value turns on debug loading (fresh copy, verbose).
pub const ENV_DEBUG: &str = "NOTIFS_DEBUG";

pub const LIBRARY_STEM: &str = "notifs";

/// Where the plugin library lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginLocation {
    File(PathBuf),
    Directory(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    pub location: PluginLocation,
    /// Fresh copies for `CachePolicy::Reload` are placed here.
    pub cache_dir: PathBuf,
    pub cache: CachePolicy,
    pub verbose: bool,
    pub debug: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            location: PluginLocation::Directory(default_base_dir()),
            cache_dir: default_cache_dir(),
            cache: CachePolicy::Use,
            verbose: false,
            debug: false,
        }
    }
}

impl PluginConfig {
    pub fn from_env() -> Result<Self, LoadError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, LoadError> {
        let mut config = Self::default();
        let mut overridden = false;

        if let Some(base) = lookup(ENV_PLUGIN_BASE) {
            config.location =
                PluginLocation::Directory(resolve_location(&base)?);
            overridden = true;
        }
        // an explicit file beats a base directory
        if let Some(file) = lookup(ENV_PLUGIN) {
            config.location = PluginLocation::File(resolve_location(&file)?);
            overridden = true;
        }
        if overridden {
            config.cache = CachePolicy::Reload;
        }
        if lookup(ENV_DEBUG).is_some() {
            config = config.with_debug(true);
        }
        Ok(config)
    }

    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: PluginLocation::File(path.into()),
            ..Self::default()
        }
    }

    /// Debug implies a fresh copy of the artifact and verbose loading.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        if debug {
            self.cache = CachePolicy::Reload;
            self.verbose = true;
        }
        self
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            cache: self.cache,
            verbose: self.verbose,
        }
    }

    pub fn library_path(&self) -> PathBuf {
        match &self.location {
            PluginLocation::File(path) => path.clone(),
            PluginLocation::Directory(dir) => dir.join(library_file_name()),
        }
    }
}

/// Turn a path or `file://` URL into an absolute path. Remote URLs are
/// rejected.
pub fn resolve_location(raw: &str) -> Result<PathBuf, LoadError> {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Err(LoadError::UnsupportedLocation {
            location: raw.to_string(),
        });
    }
    let path = Path::new(raw.strip_prefix("file://").unwrap_or(raw));
    std::path::absolute(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Platform-specific file name of the plugin library.
pub fn library_file_name() -> String {
    match std::env::consts::OS {
        "windows" => format!("{LIBRARY_STEM}.dll"),
        "macos" => {
            format!("lib{LIBRARY_STEM}.{}.dylib", std::env::consts::ARCH)
        }
        _ => format!("lib{LIBRARY_STEM}.so"),
    }
}

fn default_base_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("notifs-plugin-cache")
}
