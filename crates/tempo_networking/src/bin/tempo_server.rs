//! # TEMPO Server
//!
//! Runs the simulation on its own thread and serves each TCP connection on
//! a thread of its own.
//!
//! The server stops when `stop` or `quit` is typed on stdin, or once the
//! `--duration` elapses. Connected clients then receive a `ServerShutdown`
//! exit notice.
//!
//! ## Usage
//!
//! ```bash
//! tempo_server --config server.toml --bind 0.0.0.0:7777
//! tempo_server --duration 60
//! RUST_LOG=tempo_networking=debug LOG_FORMAT=json tempo_server
//! ```

use std::io::BufRead;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempo_core::{ChunkCoord, TerrainBlock};
use tempo_networking::{Context, MemoryAuthenticator, ServerConfig, ServerError, Session, SimulationServer};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

/// Time writer threads get to flush the shutdown notice.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

/// Command line options.
struct Args {
    config: Option<String>,
    bind: Option<SocketAddr>,
    duration: Option<Duration>,
}

fn print_help() {
    println!("Usage: tempo_server [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config <PATH>    TOML configuration file (default: built-in defaults)");
    println!("  -b, --bind <ADDR>      Listen address, overrides the configuration");
    println!("  -d, --duration <SECS>  Run for N seconds then exit");
    println!("  -h, --help             Show this help");
}

/// Returns `None` when help was requested.
fn parse_args() -> Result<Option<Args>, String> {
    let mut args = Args {
        config: None,
        bind: None,
        duration: None,
    };
    let mut argv = std::env::args().skip(1);
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                args.config = Some(argv.next().ok_or("--config needs a path")?);
            }
            "--bind" | "-b" => {
                let value = argv.next().ok_or("--bind needs an address")?;
                args.bind = Some(value.parse().map_err(|err| format!("invalid bind address {value}: {err}"))?);
            }
            "--duration" | "-d" => {
                let value = argv.next().ok_or("--duration needs a number of seconds")?;
                let secs: u64 = value.parse().map_err(|err| format!("invalid duration {value}: {err}"))?;
                args.duration = Some(Duration::from_secs(secs));
            }
            "--help" | "-h" => return Ok(None),
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(Some(args))
}

fn serve_connection(context: Arc<Context>, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(?peer, %err, "cannot disable nagle");
    }
    let reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(err) => {
            tracing::warn!(?peer, %err, "cannot split stream");
            return;
        }
    };
    if let Err(err) = Session::serve(context, reader, stream) {
        tracing::debug!(?peer, %err, "session ended with an error");
    }
}

fn accept_loop(listener: &TcpListener, context: &Arc<Context>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let context = Arc::clone(context);
                let spawned = thread::Builder::new()
                    .name("session".into())
                    .spawn(move || serve_connection(context, stream));
                if let Err(err) = spawned {
                    tracing::warn!(%err, "cannot spawn session thread");
                }
            }
            Err(err) => tracing::warn!(%err, "accept failed"),
        }
    }
}

/// Clears `running` when an operator types `stop` or `quit`.
fn watch_stdin(running: &AtomicBool) {
    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { return };
        match line.trim() {
            "stop" | "quit" => {
                tracing::info!("stop requested");
                running.store(false, Ordering::Release);
                return;
            }
            "" => {}
            other => tracing::warn!(command = other, "unknown command, expected stop or quit"),
        }
    }
}

fn spawn_stop_triggers(running: &Arc<AtomicBool>, duration: Option<Duration>) -> std::io::Result<()> {
    let flag = Arc::clone(running);
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || watch_stdin(&flag))?;

    if let Some(duration) = duration {
        let flag = Arc::clone(running);
        thread::Builder::new().name("timer".into()).spawn(move || {
            thread::sleep(duration);
            tracing::info!(secs = duration.as_secs(), "run duration elapsed");
            flag.store(false, Ordering::Release);
        })?;
    }
    Ok(())
}

fn run(args: Args) -> Result<(), ServerError> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    let authenticator = Arc::new(MemoryAuthenticator::new(config.registration_enabled));
    let mut server = SimulationServer::new(config, authenticator)?;
    server.load_terrain(TerrainBlock::filled(ChunkCoord::default(), 0))?;
    let context = server.context();

    let listener = TcpListener::bind(context.config.bind_address)?;
    tracing::info!(
        address = %context.config.bind_address,
        tick_rate = context.config.tick_rate,
        max_players = context.config.max_players,
        "listening"
    );

    let running = Arc::new(AtomicBool::new(true));
    spawn_stop_triggers(&running, args.duration)?;
    let simulation = {
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("simulation".into())
            .spawn(move || server.run(&running))?
    };
    // Accepting never ends on its own; the process exits with the simulation.
    thread::Builder::new()
        .name("accept".into())
        .spawn(move || accept_loop(&listener, &context))?;

    let result = match simulation.join() {
        Ok(result) => result,
        Err(_) => {
            tracing::error!("simulation thread panicked");
            Ok(())
        }
    };
    thread::sleep(SHUTDOWN_GRACE);
    result
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            eprintln!("{message}");
            print_help();
            return ExitCode::FAILURE;
        }
    };

    init_tracing();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "server stopped");
            ExitCode::FAILURE
        }
    }
}
