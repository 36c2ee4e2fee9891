use std::path::PathBuf;

use notifs::{Icon, Timeout};

#[derive(clap::Parser, Debug)]
#[command(
    name = "notifs",
    version,
    about = "Show a desktop notification",
    long_about = "Show a desktop notification through the notifs native \
                  plugin. Platform-specific fields are only applied when the \
                  matching --macos/--windows/--linux flag declares support \
                  for them."
)]
pub struct Args {
    #[arg(
        long,
        value_name = "PLUGIN_PATH",
        help = "Path or file:// URL of the plugin library. Overrides \
                NOTIFS_PLUGIN and implies --no-cache"
    )]
    pub plugin: Option<String>,

    #[arg(long, help = "Load a fresh copy of the plugin library")]
    pub no_cache: bool,

    #[arg(long, short, help = "Log plugin loading and dispatch details")]
    pub verbose: bool,

    #[arg(
        long,
        short = 'l',
        value_name = "LOG_PATH",
        help = "Optional log path value. If not provided, logs go to stderr"
    )]
    pub log_path: Option<PathBuf>,

    #[arg(long, help = "Declare support for macOS-only fields")]
    pub macos: bool,

    #[arg(long, help = "Declare support for Windows-only fields")]
    pub windows: bool,

    #[arg(long, help = "Declare support for Linux-only fields")]
    pub linux: bool,

    #[arg(
        long,
        help = "Silently drop fields the current OS cannot display instead \
                of failing"
    )]
    pub lenient: bool,

    #[arg(
        long = "async",
        help = "Dispatch without blocking; the plugin answers from a worker \
                thread"
    )]
    pub nonblocking: bool,

    #[arg(long, short, value_name = "TITLE")]
    pub title: Option<String>,

    #[arg(long, short, value_name = "BODY")]
    pub body: Option<String>,

    #[arg(long, value_name = "SUBTITLE", help = "macOS and Windows")]
    pub subtitle: Option<String>,

    #[arg(
        long,
        value_name = "APP",
        group = "icon",
        help = "Icon of an installed application (Linux)"
    )]
    pub icon_app: Option<String>,

    #[arg(
        long,
        value_name = "FILE",
        group = "icon",
        help = "Icon image file (Linux)"
    )]
    pub icon_path: Option<PathBuf>,

    #[arg(
        long,
        value_name = "THEME_NAME",
        group = "icon",
        help = "Icon from the desktop icon theme, e.g. utilities-terminal \
                (Linux)"
    )]
    pub icon_theme: Option<String>,

    #[arg(long, value_name = "SOUND_NAME")]
    pub sound: Option<String>,

    #[arg(
        long,
        value_name = "MILLIS",
        value_parser = parse_timeout,
        help = "Milliseconds before the notification closes, or \"never\" \
                (Windows and Linux)"
    )]
    pub timeout: Option<Timeout>,
}

impl Args {
    /// The icon requested by whichever `--icon-*` flag was given.
    pub fn icon(&self) -> std::io::Result<Option<Icon>> {
        if let Some(app) = &self.icon_app {
            return Ok(Some(Icon::app(app.clone())));
        }
        if let Some(path) = &self.icon_path {
            return Icon::from_file(path).map(Some);
        }
        Ok(self.icon_theme.clone().map(Icon::theme))
    }
}

fn parse_timeout(raw: &str) -> Result<Timeout, String> {
    if raw.eq_ignore_ascii_case("never") {
        return Ok(Timeout::Never);
    }
    raw.parse::<i64>()
        .map(Timeout::Millis)
        .map_err(|e| format!("expected milliseconds or \"never\": {e}"))
}
