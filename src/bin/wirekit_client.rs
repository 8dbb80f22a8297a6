//! wirekit demo client
//!
//! Connect ke wirekit_server, ambil registry, bind output + toplevel
//! manager, lalu jalankan beberapa request pointer.
//!
//! Usage:
//!   cargo run --release --bin wirekit_client [OPTIONS]
//!
//! Options:
//!   -s, --socket <PATH>    Socket path (default: $XDG_RUNTIME_DIR/wirekit-0)
//!   -n, --rounds <N>       Jumlah sync roundtrip untuk latency (default: 1000)
//!       --trace            Log setiap message

use std::collections::HashSet;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use wirekit::core::Role;
use wirekit::network::Transport;
use wirekit::schema::Direction;
use wirekit::{protocols, Arg, Connection, Ctx, Fixed, Message, ObjectId, ServerConfig};

struct ClientConfig {
    socket_path: PathBuf,
    rounds: usize,
    trace: bool,
}

/// Global dari registry: (name, interface, version)
#[derive(Debug, Clone)]
struct Global {
    name: u32,
    interface: String,
    version: u32,
}

#[derive(Default)]
struct ClientState {
    globals: Vec<Global>,
    done: HashSet<ObjectId>,
    toplevels: Vec<ObjectId>,
    outputs: Vec<String>,
    error: Option<String>,
}

type Shared = Arc<Mutex<ClientState>>;

fn lock(state: &Shared) -> MutexGuard<'_, ClientState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn on_event<F>(
    conn: &mut Connection,
    state: &Shared,
    interface: &str,
    name: &str,
    mut handler: F,
) -> Result<()>
where
    F: FnMut(&mut Ctx<'_>, &Message<'_>, &mut ClientState) + Send + 'static,
{
    let dispatcher = conn.dispatcher_mut();
    let opcode = dispatcher
        .schema()
        .opcode(interface, Direction::Event, name)
        .with_context(|| format!("{}.{} is not in the schema", interface, name))?;
    let state = Arc::clone(state);
    dispatcher.on_event(interface, opcode, move |ctx, msg| handler(ctx, msg, &mut lock(&state)))?;
    Ok(())
}

fn install_handlers(conn: &mut Connection, state: &Shared) -> Result<()> {
    on_event(conn, state, "display", "error", |_, msg, st| {
        let text = format!(
            "{:?} code {}: {}",
            msg.object("object_id"),
            msg.uint("code").unwrap_or_default(),
            msg.str("message").unwrap_or_default()
        );
        warn!("Server error {}", text);
        st.error = Some(text);
    })?;

    on_event(conn, state, "display", "delete_id", |ctx, msg, _| {
        let Some(id) = msg.uint("id").and_then(ObjectId::new) else { return };
        // Callback sudah dibebaskan oleh destructor `done`; hanya zombie yang perlu release
        if ctx.objects().is_zombie(id) {
            if let Err(e) = ctx.release(id) {
                debug!("release {} failed: {}", id, e);
            }
        }
    })?;

    on_event(conn, state, "callback", "done", |_, msg, st| {
        st.done.insert(msg.object);
    })?;

    on_event(conn, state, "registry", "global", |_, msg, st| {
        let global = Global {
            name: msg.uint("name").unwrap_or_default(),
            interface: msg.str("interface").unwrap_or_default().to_string(),
            version: msg.uint("version").unwrap_or(1),
        };
        debug!("global {} {} v{}", global.name, global.interface, global.version);
        st.globals.push(global);
    })?;

    on_event(conn, state, "output", "name", |_, msg, st| {
        if let Some(name) = msg.str("name") {
            st.outputs.push(name.to_string());
        }
    })?;

    on_event(conn, state, "toplevel_manager", "toplevel", |_, msg, st| {
        if let Some(handle) = msg.object("toplevel") {
            st.toplevels.push(handle);
        }
    })?;

    on_event(conn, state, "toplevel", "title", |_, msg, _| {
        info!("{} title {:?}", msg.object, msg.str("title"));
    })?;

    on_event(conn, state, "toplevel", "state", |_, msg, _| {
        let states = msg.arg("state").and_then(Arg::as_words).unwrap_or_default();
        info!("{} state {:?}", msg.object, states);
    })?;

    Ok(())
}

/// Pump socket sampai `done` untuk callback ini datang.
fn roundtrip(
    conn: &mut Connection,
    transport: &mut Transport<UnixStream>,
    state: &Shared,
) -> Result<()> {
    let callback = conn.next_id()?;
    conn.send_named(ObjectId::ROOT, "sync", &[Arg::NewId(callback)])?;
    transport.flush_from(conn)?;

    loop {
        if lock(state).done.remove(&callback) {
            return Ok(());
        }
        // Blocking read, fill_read_buffer hanya return setelah ada data
        transport.fill_read_buffer()?;
        let len = transport.readable().len();
        let result = conn.feed(transport.readable());
        transport.consume(len);
        if let Err(e) = result {
            bail!("protocol error: {}", e);
        }
        if let Some(text) = lock(state).error.take() {
            bail!("server reported {}", text);
        }
        transport.flush_from(conn)?;
    }
}

fn find_global(state: &Shared, interface: &str) -> Option<Global> {
    lock(state).globals.iter().find(|g| g.interface == interface).cloned()
}

fn bind(
    conn: &mut Connection,
    global: &Global,
    request: &str,
    max_version: u32,
) -> Result<ObjectId> {
    let id = conn.next_id()?;
    let version = global.version.min(max_version);
    conn.send_named(
        REGISTRY,
        request,
        &[Arg::Uint(global.name), Arg::Uint(version), Arg::NewId(id)],
    )?;
    Ok(id)
}

// Registry selalu id client pertama setelah display
const REGISTRY: ObjectId = match ObjectId::new(2) {
    Some(id) => id,
    None => ObjectId::ROOT,
};

fn run_client(config: ClientConfig) -> Result<()> {
    let schema = Arc::new(protocols::bundled()?);
    let mut conn_config = ServerConfig::default().connection;
    conn_config.trace_messages = config.trace;

    let stream = UnixStream::connect(&config.socket_path)
        .with_context(|| format!("cannot connect to {}", config.socket_path.display()))?;
    info!("Connected to {}", config.socket_path.display());

    let mut transport = Transport::new(stream, conn_config.read_buffer_size);
    let mut conn = Connection::with_schema(schema, Role::Client, &conn_config);
    let state: Shared = Arc::new(Mutex::new(ClientState::default()));

    conn.create_object("display", 1, Some(ObjectId::ROOT))?;
    install_handlers(&mut conn, &state)?;

    let registry = conn.next_id()?;
    if registry != REGISTRY {
        bail!("unexpected registry id {}", registry);
    }
    conn.send_named(ObjectId::ROOT, "get_registry", &[Arg::NewId(registry)])?;
    roundtrip(&mut conn, &mut transport, &state)?;
    info!("{} globals advertised", lock(&state).globals.len());

    let output = match find_global(&state, "output") {
        Some(global) => Some(bind(&mut conn, &global, "bind_output", 4)?),
        None => None,
    };
    if let Some(global) = find_global(&state, "toplevel_manager") {
        bind(&mut conn, &global, "bind_toplevel_manager", 3)?;
    }
    roundtrip(&mut conn, &mut transport, &state)?;

    let toplevels = lock(&state).toplevels.clone();
    if let (Some(output), Some(&toplevel)) = (output, toplevels.first()) {
        let version = conn.objects().negotiated_version(toplevel)?;
        if version >= 2 {
            conn.send_named(toplevel, "set_fullscreen", &[Arg::object(output)])?;
            roundtrip(&mut conn, &mut transport, &state)?;
        }
        conn.send_named(toplevel, "destroy", &[])?;
    }

    if let Some(global) = find_global(&state, "virtual_pointer_manager") {
        let manager = bind(&mut conn, &global, "bind_virtual_pointer_manager", 2)?;
        let pointer = conn.next_id()?;
        conn.send_named(manager, "create_virtual_pointer", &[Arg::NewId(pointer)])?;
        conn.send_named(
            pointer,
            "motion",
            &[Arg::Uint(0), Arg::Fixed(Fixed::from_f64(12.5)), Arg::Fixed(Fixed::from_f64(-3.25))],
        )?;
        if conn.objects().negotiated_version(pointer)? >= 2 {
            conn.send_named(
                pointer,
                "motion_precise",
                &[Arg::U64(1_000), Arg::F64(0.125), Arg::F64(-0.5)],
            )?;
        }
        conn.send_named(pointer, "frame", &[])?;
        conn.send_named(pointer, "destroy", &[])?;
        roundtrip(&mut conn, &mut transport, &state)?;
    }

    // Sync latency
    let mut samples = Vec::with_capacity(config.rounds);
    for _ in 0..config.rounds {
        let start = Instant::now();
        roundtrip(&mut conn, &mut transport, &state)?;
        samples.push(start.elapsed());
    }
    print_report(&state, &samples, conn.objects().len());
    Ok(())
}

fn print_report(state: &Shared, samples: &[Duration], live_objects: usize) {
    let st = lock(state);
    println!("\nwirekit client summary");
    println!("   Globals:       {}", st.globals.len());
    println!("   Outputs:       {:?}", st.outputs);
    println!("   Toplevels:     {}", st.toplevels.len());
    println!("   Live objects:  {}", live_objects);

    if samples.is_empty() {
        return;
    }
    let mut sorted = samples.to_vec();
    sorted.sort();
    let pct = |p: f64| sorted[((sorted.len() as f64 * p) as usize).min(sorted.len() - 1)];
    let total: Duration = sorted.iter().sum();
    println!("\n   Sync roundtrip ({} samples)", sorted.len());
    println!("   Min:  {:?}", sorted[0]);
    println!("   Avg:  {:?}", total / sorted.len() as u32);
    println!("   P50:  {:?}", pct(0.50));
    println!("   P99:  {:?}", pct(0.99));
    println!("   Max:  {:?}", sorted[sorted.len() - 1]);
}

fn parse_args() -> Result<ClientConfig> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig {
        socket_path: ServerConfig::default().socket_path,
        rounds: 1000,
        trace: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--socket" | "-s" => {
                if i + 1 < args.len() {
                    config.socket_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--rounds" | "-n" => {
                if i + 1 < args.len() {
                    config.rounds = args[i + 1].parse().context("invalid --rounds")?;
                    i += 1;
                }
            }
            "--trace" => config.trace = true,
            "--help" | "-h" => {
                println!("wirekit demo client\n");
                println!("Usage: wirekit_client [OPTIONS]\n");
                println!("Options:");
                println!("  -s, --socket <PATH>    Socket path (default: $XDG_RUNTIME_DIR/wirekit-0)");
                println!("  -n, --rounds <N>       Sync roundtrips to time (default: 1000)");
                println!("      --trace            Log every message");
                println!("  -h, --help             Show this help");
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
    let default_level = if config.trace { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    run_client(config).context("client failed (is wirekit_server running?)")
}
