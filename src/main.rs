//! A power-management tray applet for Linux desktops.
//!
//! Watches user idle time and session inhibitors and walks an
//! Awake → Locked → Blanked → Asleep ladder that locks the screen, blanks
//! monitors and suspends or powers off the machine, using the shell command
//! vocabulary of the detected desktop environment.

mod config;
mod control;
mod external;
mod singleton;
mod tray;

use anyhow::Result;
use clap::Parser;
use external::environment::{self, CommandSet, EnvSnapshot, Environment};
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use std::os::unix::process::CommandExt;
use std::process::Command;

#[derive(Parser, Debug)]
#[clap(version, about = "Power-management tray applet")]
struct Args {
    /// Override debug_mode from the config for this run
    #[clap(short = 'D', long)]
    debug: bool,

    /// Duplicate the log to stderr
    #[clap(short = 'o', long)]
    stdout: bool,

    /// exec `tail -n50 -F` on the log file
    #[clap(short = 'f', long)]
    follow_log: bool,

    /// exec `$EDITOR` on the config file
    #[clap(short = 'e', long)]
    edit_config: bool,

    /// Accelerated timeouts for manual verification of the whole ladder
    #[clap(short = 'q', long)]
    quick: bool,

    /// Skip detection and force a desktop environment (e.g. "i3", "sway")
    #[clap(long, value_name = "ENV")]
    desktop: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let paths = config::Paths::new()?;

    if args.edit_config {
        let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vim".to_string());
        let error = Command::new(&editor).arg(&paths.config_path).exec();
        eprintln!("couldn't run {}: {}", editor, error);
        std::process::exit(1);
    }
    if args.follow_log {
        let error = Command::new("tail")
            .args(["-n50", "-F"])
            .arg(paths.log_file())
            .exec();
        eprintln!("couldn't run tail: {}", error);
        std::process::exit(1);
    }

    let _logger = init_logging(&paths, args.stdout)?;
    log_panics::init();
    log::info!("START-UP (pid {})", std::process::id());

    singleton::terminate_others(config::APP_NAME).await;

    let mut store = config::ConfigStore::load(paths, args.quick)?;
    if args.debug {
        store.force_debug();
    }

    let environment = match &args.desktop {
        Some(name) => Environment::from_name(name)?,
        None => environment::detect(&EnvSnapshot::from_env())?,
    };
    let commands = CommandSet::for_environment(environment);
    commands.verify_must_haves()?;

    let applet = control::applet::Applet::new(store, commands, args.quick).await?;
    applet.run().await
}

fn init_logging(paths: &config::Paths, to_stderr: bool) -> Result<LoggerHandle> {
    let handle = Logger::try_with_env_or_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory(&paths.folder)
                .basename(config::APP_NAME)
                .suppress_timestamp(),
        )
        .rotate(
            Criterion::Size(512 * 1024),
            Naming::Numbers,
            Cleanup::KeepLogFiles(2),
        )
        .duplicate_to_stderr(if to_stderr {
            Duplicate::All
        } else {
            Duplicate::None
        })
        .format(flexi_logger::detailed_format)
        .start()?;
    Ok(handle)
}
