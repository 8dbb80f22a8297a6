//! Live Socket Test - Server di thread terpisah, client lewat Unix socket
//!
//! Usage:
//!   cargo test --test live_socket_test -- --nocapture

use std::io::{ErrorKind as IoErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use wirekit::network::{Server, SetupHook, Transport};
use wirekit::protocol::MessageHeader;
use wirekit::{protocols, Arg, Connection, Direction, ObjectId, Role, Schema, ServerConfig};

struct Running {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

fn start_server(path: &Path, schema: &Arc<Schema>) -> Running {
    let config = ServerConfig {
        socket_path: path.to_path_buf(),
        poll_timeout_ms: 10,
        ..ServerConfig::default()
    };

    let sync = schema.opcode("display", Direction::Request, "sync").unwrap();
    let setup: SetupHook = Box::new(move |conn: &mut Connection| {
        conn.create_object("display", 1, Some(ObjectId::ROOT)).unwrap();
        conn.dispatcher_mut()
            .on_request("display", sync, |ctx, msg| {
                let cb = msg.object("callback").unwrap();
                ctx.send_named(cb, "done", &[Arg::Uint(99)]).unwrap();
                ctx.send_named(ObjectId::ROOT, "delete_id", &[Arg::Uint(cb.raw())]).unwrap();
                ctx.release(cb).unwrap();
            })
            .unwrap();
    });

    // Bind sebelum thread jalan supaya connect tidak race
    let mut server = Server::bind(config, Arc::clone(schema), setup).unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let stop_in = Arc::clone(&stop);
    let handle = thread::spawn(move || server.run(&stop_in).unwrap());
    Running {
        stop,
        handle: Some(handle),
    }
}

fn connect(path: &Path) -> UnixStream {
    let stream = UnixStream::connect(path).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

fn client(schema: &Arc<Schema>) -> (Connection, Arc<Mutex<Vec<u32>>>) {
    let mut conn = Connection::with_schema(Arc::clone(schema), Role::Client, &Default::default());
    conn.create_object("display", 1, Some(ObjectId::ROOT)).unwrap();

    let done = Arc::new(Mutex::new(Vec::new()));
    let done_in = Arc::clone(&done);
    let op = schema.opcode("callback", Direction::Event, "done").unwrap();
    conn.dispatcher_mut()
        .on_event("callback", op, move |_, msg| {
            done_in.lock().unwrap().push(msg.uint("data").unwrap());
        })
        .unwrap();
    (conn, done)
}

#[test]
fn test_sync_roundtrip_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wirekit-test");
    let schema = Arc::new(protocols::bundled().unwrap());
    let _server = start_server(&path, &schema);

    let mut transport = Transport::new(connect(&path), 4096);
    let (mut conn, done) = client(&schema);

    for round in 1..=50 {
        let cb = conn.next_id().unwrap();
        conn.send_named(ObjectId::ROOT, "sync", &[Arg::NewId(cb)]).unwrap();
        transport.flush_from(&mut conn).unwrap();

        while done.lock().unwrap().len() < round {
            transport.fill_read_buffer().unwrap();
            let len = transport.readable().len();
            conn.feed(transport.readable()).unwrap();
            transport.consume(len);
        }
        // done membebaskan id; roundtrip berikutnya memakai id yang sama
        assert_eq!(conn.next_id().unwrap(), cb);
    }
    assert!(done.lock().unwrap().iter().all(|&d| d == 99));
    assert_eq!(conn.objects().len(), 1);
}

#[test]
fn test_malformed_message_gets_error_and_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wirekit-test");
    let schema = Arc::new(protocols::bundled().unwrap());
    let _server = start_server(&path, &schema);

    let mut stream = connect(&path);
    // size 6: bukan kelipatan 4
    stream.write_all(&MessageHeader::new(1, 0, 6).to_bytes()).unwrap();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let errors_in = Arc::clone(&errors);
    let (mut conn, _) = client(&schema);
    let op = schema.opcode("display", Direction::Event, "error").unwrap();
    conn.dispatcher_mut()
        .on_event("display", op, move |_, msg| {
            errors_in.lock().unwrap().push(msg.uint("code").unwrap());
        })
        .unwrap();

    let mut transport = Transport::new(stream, 4096);
    let mut idle_reads = 0;
    let closed = loop {
        match transport.fill_read_buffer() {
            Ok(0) => {
                // Read timeout muncul sebagai WouldBlock -> Ok(0)
                idle_reads += 1;
                assert!(idle_reads < 3, "server did not close the connection");
            }
            Ok(_) => {
                let len = transport.readable().len();
                conn.feed(transport.readable()).unwrap();
                transport.consume(len);
            }
            Err(e) => break e,
        }
    };
    assert_eq!(closed.kind(), IoErrorKind::ConnectionReset);
    assert_eq!(*errors.lock().unwrap(), vec![1]);
}

#[test]
fn test_connections_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wirekit-test");
    let schema = Arc::new(protocols::bundled().unwrap());
    let _server = start_server(&path, &schema);

    let mut bad = connect(&path);
    let mut good = Transport::new(connect(&path), 4096);
    let (mut conn, done) = client(&schema);

    // Object 42 tidak pernah ada
    bad.write_all(&MessageHeader::new(42, 0, 8).to_bytes()).unwrap();

    let cb = conn.next_id().unwrap();
    conn.send_named(ObjectId::ROOT, "sync", &[Arg::NewId(cb)]).unwrap();
    transport_roundtrip(&mut good, &mut conn, &done);
    assert_eq!(*done.lock().unwrap(), vec![99]);
}

fn transport_roundtrip(
    transport: &mut Transport<UnixStream>,
    conn: &mut Connection,
    done: &Arc<Mutex<Vec<u32>>>,
) {
    let before = done.lock().unwrap().len();
    transport.flush_from(conn).unwrap();
    while done.lock().unwrap().len() == before {
        transport.fill_read_buffer().unwrap();
        let len = transport.readable().len();
        conn.feed(transport.readable()).unwrap();
        transport.consume(len);
    }
}
