use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fidati_gadget::gadget::{
    report_desc, wait_for_device, ConfigFs, DeviceStrings, GadgetManager, CONFIGFS_MOUNT,
};

const DEVICE_WAIT_MS: u64 = 2000;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// fidati-gadget command line arguments
#[derive(Parser, Debug)]
#[command(name = "fidati-gadget")]
#[command(version, about = "Configure a USB gadget as a FIDO/U2F HID authenticator", long_about = None)]
struct CliArgs {
    /// ConfigFS mount point
    #[arg(long, value_name = "DIR", default_value = CONFIGFS_MOUNT)]
    configfs_path: PathBuf,

    /// Expected hidg device node after the gadget is enabled
    #[arg(long, value_name = "FILE", default_value = "/dev/hidg0")]
    hidg: PathBuf,

    /// Remove existing matching gadgets and exit
    #[arg(long)]
    clean: bool,

    /// USB serial number string
    #[arg(long, value_name = "STRING", default_value = "4242424242")]
    serial: String,

    /// USB manufacturer string
    #[arg(long, value_name = "STRING", default_value = "fidati")]
    manufacturer: String,

    /// USB product string
    #[arg(long, value_name = "STRING", default_value = "fidati U2F token")]
    product: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    let session = ConfigFs::open(&args.configfs_path)?;
    let manager = GadgetManager::new(&session);

    if args.clean {
        let removed = manager.cleanup()?;
        tracing::info!("Removed {} gadget(s)", removed);
        return Ok(());
    }

    let strings = DeviceStrings {
        serial: args.serial,
        manufacturer: args.manufacturer,
        product: args.product,
    };

    manager.configure(&strings, report_desc::U2F_HID)?;

    if wait_for_device(&args.hidg, DEVICE_WAIT_MS) {
        tracing::info!("Gadget ready, HID device at {}", args.hidg.display());
    } else {
        tracing::warn!(
            "Gadget enabled but {} did not appear within {}ms",
            args.hidg.display(),
            DEVICE_WAIT_MS
        );
    }

    Ok(())
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "fidati_gadget=error",
        LogLevel::Warn => "fidati_gadget=warn",
        LogLevel::Info => "fidati_gadget=info",
        LogLevel::Debug => "fidati_gadget=debug",
        LogLevel::Trace => "fidati_gadget=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
