//! Telepresence client CLI entry point.
//!
//! Connects to a relay, performs the HELLO/HELLO_ACK handshake, and
//! drives the cooperative event loop until `GOODBYE`.

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;

use telepresence_client::session::Session;
use telepresence_client::terminal::Terminal;
use telepresence_client::wire::GoodbyeReason;

/// Global allocator configured per the corpus's own M-MIMALLOC-APPS
/// guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Terminal/file/process multiplexing client for a telepresence relay.
#[derive(Parser, Debug)]
#[command(name = "telepresence-client", version)]
struct Cli {
    /// Strip CSI sequences and transliterate non-ASCII glyphs before
    /// writing relay-pushed output to stdout.
    #[arg(short = 's', long = "simple")]
    simple: bool,

    /// Request session resume (HELLO flag bit 0).
    #[arg(short = 'r', long = "resume")]
    resume: bool,

    /// Write logs to a file instead of discarding them; stdout/stderr
    /// are the terminal session's own transport and can't carry them.
    #[arg(short = 'l', long = "log")]
    log: bool,

    /// Relay hostname or IP.
    host: String,

    /// Relay TCP port.
    port: u16,
}

/// Open the configured log file and install `env_logger` against it,
/// matching the corpus's `Target::Pipe(log_file)` + `format_timestamp_secs`
/// setup in its own `main.rs`. A no-op when `-l/--log` was not passed.
fn init_logging(config: &telepresence_client::Config) -> Result<()> {
    if !config.log_enabled {
        return Ok(());
    }
    let log_file = std::fs::File::create(&config.log_path)
        .with_context(|| format!("creating log file at {:?}", config.log_path))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .format_timestamp_secs()
        .init();
    Ok(())
}

/// Install a panic hook that restores the terminal before unwinding
/// further, mirroring the corpus's own raw-mode-safe panic hook.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {panic_info}");
        telepresence_client::terminal::restore_saved_original();
        default_hook(panic_info);
    }));
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = telepresence_client::Config::new(cli.host, cli.port, cli.simple, cli.resume, cli.log);

    init_logging(&config)?;
    install_panic_hook();

    log::info!(
        "[Main] connecting to {}:{} (simple={}, resume={})",
        config.host,
        config.port,
        config.simple,
        config.resume
    );

    let mut session = Session::connect(&config.host, config.port, config.resume, config.simple)
        .with_context(|| format!("connecting to {}:{}", config.host, config.port))?;

    let mut term = Terminal::acquire().context("acquiring raw terminal mode")?;
    let (rows, cols) = term.size();
    session
        .send_resize(rows, cols)
        .context("sending initial TERM_RESIZE")?;

    let result = telepresence_client::event_loop::run(&mut session, &mut term);

    term.restore();

    match result {
        Ok(GoodbyeReason::Normal) => {
            log::info!("[Main] session ended normally");
            Ok(())
        }
        Ok(reason) => {
            log::warn!("[Main] session ended with reason {reason:?}");
            std::process::exit(1);
        }
        Err(e) => {
            log::error!("[Main] event loop error: {e:#}");
            Err(e)
        }
    }
}
