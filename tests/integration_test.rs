use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use httpd::reactor::sys::sys_sockname;
use httpd::server::{bind_listener, Server};
use tempfile::TempDir;

/// Binds a server to an ephemeral port over a fresh document root, runs it
/// on a background thread, and returns its address plus a shutdown handle.
fn spawn_server(root: std::path::PathBuf) -> (std::net::SocketAddr, thread::JoinHandle<()>) {
    let fd = bind_listener("127.0.0.1", 0).expect("failed to bind listener");
    let addr = sys_sockname(fd).expect("failed to read bound address");

    let handle = thread::spawn(move || {
        let mut server =
            Server::from_listener(fd, root, Duration::from_secs(10)).expect("failed to start server");
        server.run();
    });

    // Give the reactor thread a moment to enter its poll loop.
    thread::sleep(Duration::from_millis(50));
    (addr, handle)
}

fn request(addr: std::net::SocketAddr, raw: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).expect("failed to connect");
    stream.write_all(raw).expect("failed to write request");
    stream.shutdown(std::net::Shutdown::Write).ok();

    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .expect("failed to read response");
    response
}

#[test]
fn get_index_html_returns_its_bytes() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("index.html"), b"Hello").unwrap();
    let (addr, _handle) = spawn_server(dir.path().canonicalize().unwrap());

    let response = request(addr, b"GET / HTTP/1.1\r\n\r\n");
    let text = String::from_utf8_lossy(&response);

    assert!(text.starts_with("HTTP/1.1 200 Ok\r\n"));
    assert!(text.contains("Content-Length: 5\r\n"));
    assert!(text.ends_with("Hello"));
}

#[test]
fn head_request_has_no_body() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("img.png"), vec![0u8; 1024]).unwrap();
    let (addr, _handle) = spawn_server(dir.path().canonicalize().unwrap());

    let response = request(addr, b"HEAD /img.png HTTP/1.1\r\n\r\n");
    let text = String::from_utf8_lossy(&response);
    let body_start = text.find("\r\n\r\n").unwrap() + 4;

    assert!(text.contains("Content-Length: 1024"));
    assert_eq!(text.len() - body_start, 0);
}

#[test]
fn path_traversal_is_forbidden() {
    let dir = TempDir::new().unwrap();
    let (addr, _handle) = spawn_server(dir.path().canonicalize().unwrap());

    let response = request(addr, b"GET /../etc/passwd HTTP/1.1\r\n\r\n");
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 403 Forbidden\r\n"));
}

#[test]
fn connection_closes_after_one_response() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.html"), b"A").unwrap();
    let (addr, _handle) = spawn_server(dir.path().canonicalize().unwrap());

    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(b"GET /a.html HTTP/1.1\r\n\r\n").unwrap();

    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).unwrap();
    assert!(n > 0);

    // A second read on the same socket must observe EOF: no persistent
    // connections.
    let n2 = stream.read(&mut buf).unwrap();
    assert_eq!(n2, 0);
}
