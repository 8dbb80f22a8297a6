//! wirekit demo server
//!
//! Compositor tiruan di atas protocol bawaan:
//! - display.sync / get_registry
//! - registry advertise + bind (toplevel manager, output, input, color)
//! - satu toplevel palsu per toplevel manager
//!
//! Usage:
//!   cargo run --release --bin wirekit_server [OPTIONS]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use wirekit::network::{Server, SetupHook};
use wirekit::schema::Direction;
use wirekit::{protocols, Arg, Connection, Ctx, Message, ObjectId, Schema, ServerConfig};

/// Globals yang di-advertise: (name, interface, version)
const GLOBALS: &[(u32, &str, u32)] = &[
    (1, "toplevel_manager", 3),
    (2, "output", 4),
    (3, "virtual_pointer_manager", 2),
    (4, "virtual_keyboard_manager", 1),
    (5, "drm_lease_device", 1),
    (6, "color_manager", 1),
];

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
}

/// Server statistics
struct ServerStats {
    connections_total: AtomicU64,
    requests: AtomicU64,
    events_sent: AtomicU64,
    send_errors: AtomicU64,
}

impl ServerStats {
    fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
        }
    }

    fn print_stats(&self, uptime: Duration, active: usize) {
        let requests = self.requests.load(Ordering::Relaxed);
        println!("\nServer stats (uptime: {:.1}s)", uptime.as_secs_f64());
        let total = self.connections_total.load(Ordering::Relaxed);
        let rate = requests as f64 / uptime.as_secs_f64();
        println!("   Connections:   {} active, {} total", active, total);
        println!("   Requests:      {} ({:.1}/sec)", requests, rate);
        println!("   Events sent:   {}", self.events_sent.load(Ordering::Relaxed));
        let errors = self.send_errors.load(Ordering::Relaxed);
        if errors > 0 {
            println!("   Send errors:   {}", errors);
        }
    }
}

/// Kirim event, hitung hasilnya di stats.
fn emit(ctx: &mut Ctx<'_>, stats: &ServerStats, object: ObjectId, name: &str, args: &[Arg]) {
    match ctx.send_named(object, name, args) {
        Ok(()) => {
            stats.events_sent.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            stats.send_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Failed to send {} to {}: {}", name, object, e);
        }
    }
}

fn on_request<F>(
    conn: &mut Connection,
    stats: &Arc<ServerStats>,
    interface: &str,
    name: &str,
    mut handler: F,
) -> Result<()>
where
    F: FnMut(&mut Ctx<'_>, &Message<'_>, &ServerStats) + Send + 'static,
{
    let dispatcher = conn.dispatcher_mut();
    let opcode = dispatcher
        .schema()
        .opcode(interface, Direction::Request, name)
        .with_context(|| format!("{}.{} is not in the schema", interface, name))?;
    let stats = Arc::clone(stats);
    dispatcher.on_request(interface, opcode, move |ctx, msg| {
        stats.requests.fetch_add(1, Ordering::Relaxed);
        handler(ctx, msg, &stats)
    })?;
    Ok(())
}

fn install_handlers(conn: &mut Connection, stats: &Arc<ServerStats>) -> Result<()> {
    conn.create_object("display", 1, Some(ObjectId::ROOT))?;

    on_request(conn, stats, "display", "sync", |ctx, msg, stats| {
        let Some(cb) = msg.object("callback") else { return };
        emit(ctx, stats, cb, "done", &[Arg::Uint(0)]);
        emit(ctx, stats, ObjectId::ROOT, "delete_id", &[Arg::Uint(cb.raw())]);
        // delete_id sudah terkirim, client boleh pakai ulang id ini
        if let Err(e) = ctx.release(cb) {
            debug!("release {} failed: {}", cb, e);
        }
    })?;

    on_request(conn, stats, "display", "get_registry", |ctx, msg, stats| {
        let Some(registry) = msg.object("registry") else { return };
        for &(name, interface, version) in GLOBALS {
            let args = [Arg::Uint(name), Arg::str(interface), Arg::Uint(version)];
            emit(ctx, stats, registry, "global", &args);
        }
    })?;

    on_request(conn, stats, "registry", "bind_output", |ctx, msg, stats| {
        let Some(output) = msg.object("id") else { return };
        let version = msg.uint("version").unwrap_or(1);
        emit(
            ctx,
            stats,
            output,
            "geometry",
            &[
                Arg::Int(0),
                Arg::Int(0),
                Arg::Int(600),
                Arg::Int(340),
                Arg::Int(0),
                Arg::str("wirekit"),
                Arg::str("virtual-1"),
                Arg::Int(0),
            ],
        );
        let mode = [Arg::Uint(3), Arg::Int(1920), Arg::Int(1080), Arg::Int(60_000)];
        emit(ctx, stats, output, "mode", &mode);
        if version >= 4 {
            emit(ctx, stats, output, "name", &[Arg::str("VIRTUAL-1")]);
        }
        if version >= 2 {
            emit(ctx, stats, output, "done", &[]);
        }
    })?;

    on_request(conn, stats, "registry", "bind_toplevel_manager", |ctx, msg, stats| {
        let Some(manager) = msg.object("id") else { return };
        let handle = match ctx.next_id() {
            Ok(id) => id,
            Err(e) => {
                warn!("No id for toplevel handle: {}", e);
                return;
            }
        };
        emit(ctx, stats, manager, "toplevel", &[Arg::NewId(handle)]);
        emit(ctx, stats, handle, "title", &[Arg::str("wirekit demo")]);
        emit(ctx, stats, handle, "app_id", &[Arg::str("org.wirekit.demo")]);
        emit(ctx, stats, handle, "state", &[Arg::words(&[])]);
        emit(ctx, stats, handle, "done", &[]);
    })?;

    on_request(conn, stats, "toplevel", "set_fullscreen", |ctx, msg, stats| {
        info!("{} -> fullscreen on {:?}", msg.object, msg.object("output"));
        // state 2 = fullscreen
        emit(ctx, stats, msg.object, "state", &[Arg::words(&[2])]);
        emit(ctx, stats, msg.object, "done", &[]);
    })?;

    on_request(conn, stats, "toplevel", "close", |ctx, msg, stats| {
        emit(ctx, stats, msg.object, "closed", &[]);
    })?;

    // destroy adalah destructor: dispatcher membebaskan id setelah handler ini
    on_request(conn, stats, "toplevel", "destroy", |ctx, msg, stats| {
        debug!("toplevel {} destroyed", msg.object);
        emit(ctx, stats, ObjectId::ROOT, "delete_id", &[Arg::Uint(msg.object.raw())]);
    })?;

    on_request(conn, stats, "virtual_pointer", "motion", |_, msg, _| {
        let dx = msg.fixed("dx").map(|f| f.to_f64()).unwrap_or_default();
        let dy = msg.fixed("dy").map(|f| f.to_f64()).unwrap_or_default();
        debug!("pointer {} motion {:+.2} {:+.2}", msg.object, dx, dy);
    })?;

    on_request(conn, stats, "virtual_pointer", "motion_precise", |_, msg, _| {
        debug!("pointer {} precise motion {:?} {:?}", msg.object, msg.arg("dx"), msg.arg("dy"));
    })?;

    Ok(())
}

fn parse_args() -> Result<ServerConfig> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    // --config dibaca dulu supaya flag lain bisa override
    if let Some(pos) = args.iter().position(|a| a == "--config" || a == "-c") {
        let path = args.get(pos + 1).context("--config needs a path")?;
        config = ServerConfig::load(path.as_ref())?;
    }

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => i += 1,
            "--socket" | "-s" => {
                if i + 1 < args.len() {
                    config.socket_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--schema" => {
                if i + 1 < args.len() {
                    config.schema_paths.push(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--max-connections" => {
                if i + 1 < args.len() {
                    config.max_connections =
                        args[i + 1].parse().context("invalid --max-connections")?;
                    i += 1;
                }
            }
            "--trace" => config.connection.trace_messages = true,
            "--verbose" | "-v" => config.verbose = true,
            "--help" | "-h" => {
                println!("wirekit demo server\n");
                println!("Usage: wirekit_server [OPTIONS]\n");
                println!("Options:");
                println!("  -c, --config <PATH>        TOML config file");
                println!("  -s, --socket <PATH>        Socket path (default: $XDG_RUNTIME_DIR/wirekit-0)");
                println!("      --schema <PATH>        Schema file, repeatable (default: bundled)");
                println!("      --max-connections <N>  Connection limit (default: 1024)");
                println!("      --trace                Log every message");
                println!("  -v, --verbose              Debug logging and periodic stats");
                println!("  -h, --help                 Show this help");
                std::process::exit(0);
            }
            other => warn!("Ignoring unknown argument {}", other),
        }
        i += 1;
    }

    Ok(config)
}

fn main() -> Result<()> {
    let config = parse_args()?;

    let default_level = if config.verbose || config.connection.trace_messages {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let schema = if config.schema_paths.is_empty() {
        protocols::bundled()?
    } else {
        Schema::load(&config.schema_paths)?
    };
    let schema = Arc::new(schema);
    info!("Loaded {} interfaces", schema.interfaces().len());

    unsafe {
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
    }

    let stats = Arc::new(ServerStats::new());
    let hook_stats = Arc::clone(&stats);
    let setup: SetupHook = Box::new(move |conn: &mut Connection| {
        hook_stats.connections_total.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = install_handlers(conn, &hook_stats) {
            warn!("Failed to install handlers: {:#}", e);
            conn.close();
        }
    });

    let verbose = config.verbose;
    let poll_timeout = Duration::from_millis(config.poll_timeout_ms);
    let mut server = Server::bind(config, schema, setup).context("failed to bind socket")?;

    let start_time = Instant::now();
    let mut last_stats_print = Instant::now();
    let mut events = mio::Events::with_capacity(1024);
    while !STOP.load(Ordering::Relaxed) {
        server.poll_once(&mut events, Some(poll_timeout))?;

        if verbose && last_stats_print.elapsed() > Duration::from_secs(5) {
            stats.print_stats(start_time.elapsed(), server.connection_count());
            last_stats_print = Instant::now();
        }
    }

    info!("Shutting down");
    server.shutdown();
    stats.print_stats(start_time.elapsed(), server.connection_count());
    Ok(())
}
