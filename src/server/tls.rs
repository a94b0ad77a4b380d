//! # Tarea de Comunicación TLS
//! src/server/tls.rs
//!
//! `TlsCommTask` envuelve la misma máquina de estados HTTP de
//! [`CommCore`] detrás de una sesión rustls. La sesión se interpone
//! entre el socket y el parser: los bytes cifrados entran con
//! `read_tls` + `process_new_packets`, el plaintext descifrado se
//! apendiza al [`ReadBuffer`](crate::server::buffer::ReadBuffer), y las
//! respuestas serializadas pasan por el `writer()` de la sesión antes
//! de salir con `write_tls`.
//!
//! Diferencias con la tarea plana:
//!
//! - el handshake `{NotAccepted, Accepted}` precede a todo parsing;
//! - la lectura descifrada se drena en loop: el engine puede tener más
//!   plaintext buffereado que lo que produjo una lectura de socket;
//! - el engine puede necesitar la dirección de I/O opuesta para
//!   avanzar: los flags de redirección convierten un evento de
//!   escritura en un intento de lectura (y viceversa);
//! - el cierre intenta un close_notify ordenado con reintentos
//!   acotados; fallar ahí nunca es fatal, solo menos prolijo.

use crate::config::Config;
use crate::server::comm::{CommCore, CommFlow, ConnectionInfo, ServerContext};
use crate::server::event_loop::{
    EventLoopControl, EventSet, EventTask, EventToken, TaskFlow,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reintentos del cierre ordenado antes de cerrar el socket igual
const TLS_SHUTDOWN_RETRIES: usize = 10;

/// Tamaño del scratch buffer de lectura de plaintext
const TLS_READ_CHUNK: usize = 4096;

/// Errores de carga de la configuración TLS
#[derive(Debug)]
pub enum TlsSetupError {
    Io(String, io::Error),
    MissingPrivateKey(String),
    InvalidClientCa(String),
    Rustls(rustls::Error),
}

impl std::fmt::Display for TlsSetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsSetupError::Io(path, e) => write!(f, "no se pudo leer {}: {}", path, e),
            TlsSetupError::MissingPrivateKey(path) => {
                write!(f, "{} no contiene una clave privada", path)
            }
            TlsSetupError::InvalidClientCa(detail) => {
                write!(f, "CA de clientes inválida: {}", detail)
            }
            TlsSetupError::Rustls(e) => write!(f, "configuración TLS inválida: {}", e),
        }
    }
}

impl std::error::Error for TlsSetupError {}

impl From<rustls::Error> for TlsSetupError {
    fn from(e: rustls::Error) -> Self {
        TlsSetupError::Rustls(e)
    }
}

/// Carga certificado, clave y (opcionalmente) la CA de clientes
///
/// Con `tls_client_ca` configurada se exige certificado de cliente
/// verificado contra esa CA.
pub fn load_server_config(config: &Config) -> Result<Arc<ServerConfig>, TlsSetupError> {
    let certs = read_certs(&config.tls_cert)?;
    let key = read_private_key(&config.tls_key)?;

    let builder = if config.tls_client_ca.is_empty() {
        ServerConfig::builder().with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        for cert in read_certs(&config.tls_client_ca)? {
            roots
                .add(cert)
                .map_err(|e| TlsSetupError::InvalidClientCa(e.to_string()))?;
        }
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| TlsSetupError::InvalidClientCa(e.to_string()))?;
        ServerConfig::builder().with_client_cert_verifier(verifier)
    };

    Ok(Arc::new(builder.with_single_cert(certs, key)?))
}

fn read_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsSetupError> {
    let file = File::open(path).map_err(|e| TlsSetupError::Io(path.to_string(), e))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsSetupError::Io(path.to_string(), e))
}

fn read_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsSetupError> {
    let file = File::open(path).map_err(|e| TlsSetupError::Io(path.to_string(), e))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsSetupError::Io(path.to_string(), e))?
        .ok_or_else(|| TlsSetupError::MissingPrivateKey(path.to_string()))
}

/// Tarea de comunicación sobre una sesión TLS
///
/// Genérica sobre el transporte igual que
/// [`SocketCommTask`](crate::server::comm::SocketCommTask).
pub struct TlsCommTask<S: Read + Write + Send = TcpStream> {
    stream: S,
    session: ServerConnection,
    /// Handshake completado
    accepted: bool,
    /// El engine necesita write-readiness para progresar una lectura
    read_blocked_on_write: bool,
    /// El engine necesita read-readiness para progresar una escritura
    write_blocked_on_read: bool,
    core: CommCore,
}

impl<S: Read + Write + Send> TlsCommTask<S> {
    /// Crea la sesión; si rustls rechaza la configuración la conexión
    /// se descarta en el listener
    pub fn new(
        stream: S,
        tls_config: Arc<ServerConfig>,
        context: Arc<ServerContext>,
        control: Arc<dyn EventLoopControl>,
        info: ConnectionInfo,
    ) -> Result<Self, rustls::Error> {
        let session = ServerConnection::new(tls_config)?;
        Ok(Self {
            stream,
            session,
            accepted: false,
            read_blocked_on_write: false,
            write_blocked_on_read: false,
            core: CommCore::new(context, control, info),
        })
    }

    /// Lee bytes cifrados y drena todo el plaintext disponible
    ///
    /// Retorna `true` si el peer cerró (close_notify o EOF del socket).
    fn pump_read(&mut self) -> io::Result<bool> {
        self.read_blocked_on_write = false;
        let mut peer_closed = false;

        loop {
            if !self.session.wants_read() {
                break;
            }
            match self.session.read_tls(&mut self.stream) {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            let io_state = self.session.process_new_packets().map_err(|error| {
                // Intentar emitir el alert antes del cierre abrupto
                let _ = self.session.write_tls(&mut self.stream);
                io::Error::new(io::ErrorKind::InvalidData, error.to_string())
            })?;

            // El engine puede haber descifrado más de lo que produjo
            // esta lectura de socket: drenar todo
            if io_state.plaintext_bytes_to_read() > 0 {
                let mut scratch = [0u8; TLS_READ_CHUNK];
                loop {
                    match self.session.reader().read(&mut scratch) {
                        Ok(0) => break,
                        Ok(n) => self.core.read_buffer.append(&scratch[..n]),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                            peer_closed = true;
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            // close_notify del peer: equivale al EOF del caso plano
            if io_state.peer_has_closed() {
                peer_closed = true;
                break;
            }
        }

        // Para seguir leyendo el engine puede necesitar escribir primero
        if self.session.wants_write() {
            self.read_blocked_on_write = true;
        }
        Ok(peer_closed)
    }

    /// Pasa las respuestas por el cifrado y las escribe al socket
    fn pump_write(&mut self) -> io::Result<()> {
        // Plaintext pendiente hacia el writer de la sesión (solo
        // cuando el handshake ya terminó)
        if self.accepted && self.core.has_pending_writes() {
            let mut writer = self.session.writer();
            self.core.write_queue().flush_to(&mut writer)?;
        }
        self.write_blocked_on_read =
            self.session.is_handshaking() && self.core.has_pending_writes();

        // Bytes cifrados hacia el socket
        while self.session.wants_write() {
            match self.session.write_tls(&mut self.stream) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Cierre ordenado con reintentos acotados
    ///
    /// Si el close_notify no sale en [`TLS_SHUTDOWN_RETRIES`] intentos
    /// se cierra el socket igual: el fallo solo cuesta prolijidad.
    fn shutdown_tls(&mut self) {
        self.session.send_close_notify();
        for _ in 0..TLS_SHUTDOWN_RETRIES {
            if !self.session.wants_write() {
                return;
            }
            match self.session.write_tls(&mut self.stream) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        debug!("cierre TLS sin close_notify completo");
    }

    /// Interés combinado del engine y del estado HTTP
    fn update_interest(&mut self) {
        let readable = self.core.wants_read() || self.session.wants_read();
        let writable = self.session.wants_write()
            || self.core.has_pending_writes()
            || self.read_blocked_on_write;
        self.core.set_interest(readable, writable);
    }
}

impl<S: Read + Write + Send> EventTask for TlsCommTask<S> {
    fn attached(&mut self, token: EventToken) {
        self.core.attach(token);
    }

    fn handle_event(&mut self, events: EventSet) -> TaskFlow {
        if events.contains(EventSet::TIMER) {
            debug!(token = self.core.token(), "keep-alive vencido, cierre TLS");
            self.shutdown_tls();
            return TaskFlow::Close;
        }

        if events.contains(EventSet::ASYNC) {
            self.core.drain_responses();
        }

        // Redirección: un evento puede destrabar la dirección opuesta
        let read_ready = events.contains(EventSet::READ)
            || (events.contains(EventSet::WRITE) && self.read_blocked_on_write);
        let write_ready = events.contains(EventSet::WRITE)
            || (events.contains(EventSet::READ) && self.write_blocked_on_read);

        let mut peer_closed = false;
        if read_ready {
            match self.pump_read() {
                Ok(closed) => peer_closed = closed,
                Err(error) => {
                    warn!(%error, "error TLS terminal, cierre abrupto");
                    return TaskFlow::Close;
                }
            }

            if !self.accepted && !self.session.is_handshaking() {
                self.accepted = true;
                debug!(token = self.core.token(), "handshake TLS completado");
            }

            if let CommFlow::CloseForced = self.core.process_buffer() {
                let _ = self.pump_write();
                self.shutdown_tls();
                return TaskFlow::Close;
            }
        }

        if write_ready || self.core.has_pending_writes() || self.session.wants_write() {
            if let Err(error) = self.pump_write() {
                warn!(%error, "error de escritura TLS, cierre abrupto");
                return TaskFlow::Close;
            }
        }

        if peer_closed || self.core.ready_to_close() {
            self.shutdown_tls();
            return TaskFlow::Close;
        }

        self.update_interest();
        if self.accepted {
            self.core.maybe_arm_keep_alive();
        }
        TaskFlow::Continue
    }
}
