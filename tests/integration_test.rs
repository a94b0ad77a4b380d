//! Tests de integración del servidor completo
//! tests/integration_test.rs
//!
//! Cada test levanta su propio servidor en un puerto efímero y habla
//! HTTP crudo por el socket, sin ningún cliente de por medio: lo que
//! se verifica es exactamente lo que sale por el wire.

use redunix_httpd::auth::AllowAll;
use redunix_httpd::config::Config;
use redunix_httpd::dispatcher::{
    Handler, HandlerError, HandlerFactory, JobContext, JobOutcome, StaticHandlerFactory,
};
use redunix_httpd::http::{Request, Response, StatusCode};
use redunix_httpd::server::{ReactorHandle, Server};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ==================== Helpers ====================

struct RunningServer {
    address: SocketAddr,
    handle: Arc<ReactorHandle>,
    join: Option<thread::JoinHandle<()>>,
}

impl RunningServer {
    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.address).expect("no se pudo conectar");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
            .set_write_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn test_config() -> Config {
    Config {
        port: 0,
        ..Config::default()
    }
}

fn start_server(config: Config, factory: Arc<dyn HandlerFactory>) -> RunningServer {
    let mut server =
        Server::new(config, factory, Arc::new(AllowAll)).expect("no se pudo crear el servidor");
    let address = server.local_addr();
    let handle = server.handle();
    let join = thread::spawn(move || {
        server.run().expect("el servidor terminó con error");
    });
    // Darle tiempo al reactor a registrar el listener
    thread::sleep(Duration::from_millis(100));
    RunningServer {
        address,
        handle,
        join: Some(join),
    }
}

fn start_default_server() -> RunningServer {
    start_server(test_config(), Arc::new(StaticHandlerFactory))
}

/// Lee exactamente una respuesta HTTP del stream (headers + body por
/// content-length) y la retorna completa como String
fn read_one_response(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut chunk = [0u8; 1024];

    // Headers hasta el terminador
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).expect("error leyendo la respuesta");
        assert!(n > 0, "conexión cerrada a mitad de los headers");
        data.extend_from_slice(&chunk[..n]);
    };

    let headers = String::from_utf8_lossy(&data[..header_end]).to_lowercase();
    let body_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .map(|v| v.trim().parse::<usize>().unwrap())
        .unwrap_or(0);

    while data.len() < header_end + body_length {
        let n = stream.read(&mut chunk).expect("error leyendo el body");
        assert!(n > 0, "conexión cerrada a mitad del body");
        data.extend_from_slice(&chunk[..n]);
    }

    String::from_utf8_lossy(&data[..header_end + body_length]).to_string()
}

fn extract_body(response: &str) -> &str {
    match response.find("\r\n\r\n") {
        Some(pos) => &response[pos + 4..],
        None => "",
    }
}

// ==================== Keep-alive y cierre ====================

#[test]
fn test_keep_alive_serves_multiple_requests() {
    let server = start_default_server();
    let mut client = server.connect();

    for path in ["/primero", "/segundo", "/tercero"] {
        let request = format!("GET {} HTTP/1.1\r\nhost: localhost\r\n\r\n", path);
        client.write_all(request.as_bytes()).unwrap();
        let response = read_one_response(&mut client);
        assert!(response.starts_with("HTTP/1.1 200"), "respuesta: {}", response);
        assert!(extract_body(&response).contains(path));
    }
}

#[test]
fn test_http10_closes_after_response() {
    let server = start_default_server();
    let mut client = server.connect();

    client
        .write_all(b"GET /viejo HTTP/1.0\r\n\r\n")
        .unwrap();

    let mut raw = Vec::new();
    client.read_to_end(&mut raw).expect("el servidor debe cerrar");
    let response = String::from_utf8_lossy(&raw);
    assert!(response.starts_with("HTTP/1.0 200"), "respuesta: {}", response);
    assert!(response.to_lowercase().contains("connection: close"));
}

#[test]
fn test_connection_close_header_honored() {
    let server = start_default_server();
    let mut client = server.connect();

    client
        .write_all(b"GET /ultimo HTTP/1.1\r\nconnection: close\r\n\r\n")
        .unwrap();

    let mut raw = Vec::new();
    client.read_to_end(&mut raw).expect("el servidor debe cerrar");
    assert!(String::from_utf8_lossy(&raw).starts_with("HTTP/1.1 200"));
}

// ==================== Pipelining y parsing incremental ====================

#[test]
fn test_pipelined_requests_answered_in_order() {
    let server = start_default_server();
    let mut client = server.connect();

    client
        .write_all(
            b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\nGET /c HTTP/1.1\r\n\r\n",
        )
        .unwrap();

    for path in ["/a", "/b", "/c"] {
        let response = read_one_response(&mut client);
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(
            extract_body(&response).contains(path),
            "se esperaba {} en: {}",
            path,
            response
        );
    }
}

#[test]
fn test_header_split_across_packets() {
    let server = start_default_server();
    let mut client = server.connect();

    // El terminador llega en una escritura separada
    client.write_all(b"GET /partido HTTP/1.1\r\nhost: loc").unwrap();
    thread::sleep(Duration::from_millis(50));
    client.write_all(b"alhost\r\n\r\n").unwrap();

    let response = read_one_response(&mut client);
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(extract_body(&response).contains("/partido"));
}

#[test]
fn test_body_split_across_packets() {
    let server = start_default_server();
    let mut client = server.connect();

    client
        .write_all(b"POST /datos HTTP/1.1\r\ncontent-length: 10\r\n\r\n12345")
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    client.write_all(b"67890").unwrap();

    let response = read_one_response(&mut client);
    assert!(response.starts_with("HTTP/1.1 200"), "respuesta: {}", response);
}

// ==================== Errores de protocolo ====================

#[test]
fn test_oversized_header_rejected_and_closed() {
    let config = Config {
        max_header_size: 256,
        ..test_config()
    };
    let server = start_server(config, Arc::new(StaticHandlerFactory));
    let mut client = server.connect();

    let request = format!("GET / HTTP/1.1\r\nx-relleno: {}\r\n\r\n", "a".repeat(1024));
    client.write_all(request.as_bytes()).unwrap();

    let mut raw = Vec::new();
    client
        .read_to_end(&mut raw)
        .expect("el servidor debe cerrar tras el error de protocolo");
    assert!(String::from_utf8_lossy(&raw).contains("431"));
}

#[test]
fn test_unsupported_version_rejected() {
    let server = start_default_server();
    let mut client = server.connect();

    client.write_all(b"GET / HTTP/2.0\r\n\r\n").unwrap();

    let mut raw = Vec::new();
    client.read_to_end(&mut raw).unwrap();
    assert!(String::from_utf8_lossy(&raw).contains("505"));
}

#[test]
fn test_malformed_request_line_rejected() {
    let server = start_default_server();
    let mut client = server.connect();

    client.write_all(b"ESTO NO ES HTTP\r\n\r\n").unwrap();

    let mut raw = Vec::new();
    client.read_to_end(&mut raw).unwrap();
    let response = String::from_utf8_lossy(&raw);
    assert!(
        response.contains("400") || response.contains("405"),
        "respuesta: {}",
        response
    );
}

// ==================== CORS ====================

#[test]
fn test_cors_preflight_answered_without_dispatch() {
    let server = start_default_server();
    let mut client = server.connect();

    client
        .write_all(
            b"OPTIONS /api HTTP/1.1\r\n\
              origin: http://ejemplo.test\r\n\
              access-control-request-method: PUT\r\n\
              access-control-request-headers: x-propio\r\n\r\n",
        )
        .unwrap();

    let response = read_one_response(&mut client);
    let lower = response.to_lowercase();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(lower.contains("access-control-allow-methods:"));
    assert!(lower.contains("x-propio"));
    assert!(lower.contains("access-control-max-age: 1800"));
    // El preflight no anuncia allow-origin: eso lo hace la respuesta real
    assert!(!lower.contains("access-control-allow-origin"));
}

#[test]
fn test_cors_origin_echoed_on_normal_response() {
    let server = start_default_server();
    let mut client = server.connect();

    client
        .write_all(b"GET / HTTP/1.1\r\norigin: http://ejemplo.test\r\n\r\n")
        .unwrap();

    let response = read_one_response(&mut client);
    let lower = response.to_lowercase();
    assert!(lower.contains("access-control-allow-origin: http://ejemplo.test"));
    assert!(lower.contains("access-control-allow-credentials: true"));
}

// ==================== Ejecución asíncrona ====================

#[test]
fn test_async_request_gets_immediate_202() {
    let server = start_default_server();
    let mut client = server.connect();

    client
        .write_all(b"POST /tarea HTTP/1.1\r\nx-arango-async: true\r\n\r\n")
        .unwrap();

    let response = read_one_response(&mut client);
    assert!(response.starts_with("HTTP/1.1 202"), "respuesta: {}", response);
    assert!(!response.to_lowercase().contains("x-arango-async-id"));

    // La conexión sigue viva para el siguiente request
    client.write_all(b"GET /sigue HTTP/1.1\r\n\r\n").unwrap();
    let next = read_one_response(&mut client);
    assert!(next.starts_with("HTTP/1.1 200"));
}

#[test]
fn test_async_store_returns_job_id() {
    let server = start_default_server();
    let mut client = server.connect();

    client
        .write_all(b"POST /tarea HTTP/1.1\r\nx-arango-async: store\r\n\r\n")
        .unwrap();

    let response = read_one_response(&mut client);
    assert!(response.starts_with("HTTP/1.1 202"));
    assert!(response.to_lowercase().contains("x-arango-async-id: "));
}

// ==================== Backpressure ====================

/// Handler que tarda lo suficiente para llenar una cola de tamaño 1
struct SlowHandler;

impl Handler for SlowHandler {
    fn execute(&mut self, _context: &JobContext) -> Result<JobOutcome, HandlerError> {
        thread::sleep(Duration::from_millis(500));
        Ok(JobOutcome::Done(
            Response::new(StatusCode::Ok).with_body("lento"),
        ))
    }
}

struct SlowFactory;

impl HandlerFactory for SlowFactory {
    fn create_handler(&self, _request: &Request) -> Box<dyn Handler> {
        Box::new(SlowHandler)
    }
}

#[test]
fn test_full_queue_returns_503_and_keeps_connection() {
    let config = Config {
        dispatcher_threads: 1,
        queue_size: 1,
        ..test_config()
    };
    let server = start_server(config, Arc::new(SlowFactory));

    // Ocupar al único worker y llenar la cola
    let mut first = server.connect();
    first.write_all(b"GET /uno HTTP/1.1\r\n\r\n").unwrap();
    thread::sleep(Duration::from_millis(150));
    let mut second = server.connect();
    second.write_all(b"GET /dos HTTP/1.1\r\n\r\n").unwrap();
    thread::sleep(Duration::from_millis(150));

    // El tercero no entra: servidor ocupado, pero la conexión queda viva
    let mut third = server.connect();
    third.write_all(b"GET /tres HTTP/1.1\r\n\r\n").unwrap();
    let rejected = read_one_response(&mut third);
    assert!(rejected.starts_with("HTTP/1.1 503"), "respuesta: {}", rejected);

    // Los dos primeros terminan bien
    let ok_first = read_one_response(&mut first);
    assert!(ok_first.starts_with("HTTP/1.1 200"));
    let ok_second = read_one_response(&mut second);
    assert!(ok_second.starts_with("HTTP/1.1 200"));

    // Y la conexión rechazada acepta un retry
    thread::sleep(Duration::from_millis(100));
    third.write_all(b"GET /retry HTTP/1.1\r\n\r\n").unwrap();
    let retried = read_one_response(&mut third);
    assert!(retried.starts_with("HTTP/1.1 200"), "respuesta: {}", retried);
}

// ==================== Compresión ====================

#[test]
fn test_gzip_applied_over_threshold() {
    let config = Config {
        gzip_threshold: 1,
        ..test_config()
    };
    let server = start_server(config, Arc::new(StaticHandlerFactory));
    let mut client = server.connect();

    client
        .write_all(b"GET /comprimido HTTP/1.1\r\naccept-encoding: gzip\r\n\r\n")
        .unwrap();

    let response = read_one_response(&mut client);
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.to_lowercase().contains("content-encoding: gzip"));
}

#[test]
fn test_gzip_skipped_without_accept_encoding() {
    let config = Config {
        gzip_threshold: 1,
        ..test_config()
    };
    let server = start_server(config, Arc::new(StaticHandlerFactory));
    let mut client = server.connect();

    client.write_all(b"GET /plano HTTP/1.1\r\n\r\n").unwrap();

    let response = read_one_response(&mut client);
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(!response.to_lowercase().contains("content-encoding"));
}

// ==================== HEAD ====================

#[test]
fn test_head_reports_length_without_body() {
    let server = start_default_server();
    let mut client = server.connect();

    client
        .write_all(b"HEAD /recurso HTTP/1.1\r\nconnection: close\r\n\r\n")
        .unwrap();

    let mut raw = Vec::new();
    client.read_to_end(&mut raw).unwrap();
    let response = String::from_utf8_lossy(&raw);
    let lower = response.to_lowercase();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(lower.contains("content-length:"));
    // Sin body: la respuesta termina donde terminan los headers
    assert!(response.ends_with("\r\n\r\n"), "respuesta: {:?}", response);
}
