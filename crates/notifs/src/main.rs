use std::{error::Error, process::exit, sync::Arc};

use clap::Parser;
use mimalloc::MiMalloc;
use notifs::{
    CachePolicy, DispatchClient, DylibLoader, Notification, NotifyResult,
    PlatformSupport, PluginConfig, PluginHandle,
    config::{PluginLocation, resolve_location},
};
use tracing::{error, info};

pub mod cli;
pub mod tracing_init;

use crate::{cli::Args, tracing_init::init_tracing};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

type Result<T> = std::result::Result<T, Box<dyn Error>>;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = init_tracing(&args) {
        eprintln!("Could not initialize log: {e}");
        exit(-1);
    }

    if let Err(e) = run(args).await {
        error!("{e}");
        eprintln!("notifs: {e}");
        exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = plugin_config(&args)?;
    let options = config.load_options();
    let handle = Arc::new(PluginHandle::new(DylibLoader::new(config)));
    let generation = handle.load(options)?;
    info!(generation, "plugin loaded");

    let client = DispatchClient::new(Arc::clone(&handle));
    let outcome = display(&args, &client).await;

    handle.unload()?;
    outcome.map(|_| ())
}

fn plugin_config(args: &Args) -> Result<PluginConfig> {
    let mut config = PluginConfig::from_env()?;
    if let Some(plugin) = &args.plugin {
        config.location = PluginLocation::File(resolve_location(plugin)?);
        config.cache = CachePolicy::Reload;
    }
    if args.no_cache {
        config.cache = CachePolicy::Reload;
    }
    config.verbose |= args.verbose;
    Ok(config)
}

async fn display(args: &Args, client: &DispatchClient) -> Result<NotifyResult> {
    let supports = PlatformSupport {
        macos: args.macos,
        windows: args.windows,
        linux: args.linux,
    };
    let mut notification = Notification::new(supports, !args.lenient);

    if let Some(title) = &args.title {
        notification.title(title.clone());
    }
    if let Some(body) = &args.body {
        notification.body(body.clone());
    }
    if let Some(sound) = &args.sound {
        notification.sound_name(sound.clone());
    }
    if let Some(subtitle) = &args.subtitle {
        notification.subtitle(subtitle.clone())?;
    }
    if let Some(icon) = args.icon()? {
        notification.icon(icon)?;
    }
    if let Some(timeout) = args.timeout {
        notification.timeout(timeout)?;
    }

    let result = if args.nonblocking {
        notification.send(client).await?
    } else {
        notification.show(client)?
    };
    Ok(result)
}
