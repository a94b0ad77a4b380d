//! # Tarea de Escucha
//! src/server/listen.rs
//!
//! `ListenTask` es la tarea del event loop dueña del socket de escucha.
//! Ante read-readiness acepta conexiones en loop hasta agotar el
//! backlog (requisito de los reactors edge-triggered), configura cada
//! socket aceptado (no-bloqueante, Nagle apagado) y registra la comm
//! task correspondiente — plana o TLS según el listener.
//!
//! Los fallos de accept nunca detienen al listener: se loguean con
//! rate-limit pasado un umbral fijo.

use crate::server::comm::{ConnectionInfo, ServerContext, SocketCommTask};
use crate::server::event_loop::{EventLoopControl, EventSet, EventTask, TaskFlow};
use crate::server::tls::TlsCommTask;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fallos de accept logueados antes de suprimir el detalle
const ACCEPT_FAILURE_LOG_THRESHOLD: u64 = 10;

/// Tarea que acepta conexiones entrantes
pub struct ListenTask {
    listener: TcpListener,
    context: Arc<ServerContext>,
    control: Arc<dyn EventLoopControl>,
    /// `Some` convierte este listener en un endpoint TLS
    tls: Option<Arc<rustls::ServerConfig>>,
    accept_failures: u64,
}

impl ListenTask {
    /// Hace bind y deja el listener en modo no-bloqueante
    pub fn bind(
        address: &str,
        context: Arc<ServerContext>,
        control: Arc<dyn EventLoopControl>,
        tls: Option<Arc<rustls::ServerConfig>>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        info!(
            address = %listener.local_addr()?,
            secure = tls.is_some(),
            "listener activo"
        );
        Ok(Self {
            listener,
            context,
            control,
            tls,
            accept_failures: 0,
        })
    }

    /// Descriptor del socket de escucha, para registrarlo en el reactor
    pub fn raw_fd(&self) -> std::os::unix::io::RawFd {
        self.listener.as_raw_fd()
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Configura y registra una conexión aceptada
    fn register_connection(&mut self, stream: TcpStream, peer: std::net::SocketAddr) {
        if let Err(error) = stream.set_nonblocking(true) {
            warn!(%error, "no se pudo poner el socket en modo no-bloqueante");
            return;
        }
        // Nagle apagado: las respuestas salen apenas se serializan
        if let Err(error) = stream.set_nodelay(true) {
            debug!(%error, "set_nodelay falló, se continúa igual");
        }

        let info = ConnectionInfo {
            peer: Some(peer),
            local: self.listener.local_addr().ok(),
            secure: self.tls.is_some(),
        };
        let fd = stream.as_raw_fd();

        match &self.tls {
            None => {
                let task =
                    SocketCommTask::new(stream, Arc::clone(&self.context), Arc::clone(&self.control), info);
                let token = self.control.add_task(fd, true, false, Box::new(task));
                debug!(token, %peer, "conexión aceptada");
            }
            Some(tls_config) => {
                match TlsCommTask::new(
                    stream,
                    Arc::clone(tls_config),
                    Arc::clone(&self.context),
                    Arc::clone(&self.control),
                    info,
                ) {
                    Ok(task) => {
                        // El handshake puede necesitar escribir de entrada
                        let token = self.control.add_task(fd, true, true, Box::new(task));
                        debug!(token, %peer, "conexión TLS aceptada");
                    }
                    Err(error) => {
                        // Falla de setup de sesión: se descarta la conexión
                        warn!(%error, %peer, "no se pudo crear la sesión TLS");
                    }
                }
            }
        }
    }
}

impl EventTask for ListenTask {
    fn handle_event(&mut self, events: EventSet) -> TaskFlow {
        if !events.contains(EventSet::READ) {
            return TaskFlow::Continue;
        }

        // Drenar el backlog completo antes de volver al poll
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.register_connection(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    self.accept_failures += 1;
                    if self.accept_failures < ACCEPT_FAILURE_LOG_THRESHOLD {
                        warn!(%error, "fallo de accept");
                    } else if self.accept_failures == ACCEPT_FAILURE_LOG_THRESHOLD {
                        warn!(%error, "fallos de accept repetidos, se suprime el detalle");
                    }
                    break;
                }
            }
        }

        TaskFlow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAll;
    use crate::config::Config;
    use crate::dispatcher::{DispatcherQueue, StaticHandlerFactory};
    use crate::metrics::MetricsCollector;
    use crate::server::event_loop::mock::{ControlCall, MockEventLoop};
    use std::time::Duration;

    fn make_context() -> Arc<ServerContext> {
        let config = Config::default();
        Arc::new(ServerContext {
            dispatcher: DispatcherQueue::new(config.queue_size),
            config: Arc::new(config),
            factory: Arc::new(StaticHandlerFactory),
            authenticator: Arc::new(AllowAll),
            metrics: MetricsCollector::new(),
        })
    }

    #[test]
    fn test_accept_registers_comm_task() {
        let control = Arc::new(MockEventLoop::new());
        let mut listen = ListenTask::bind(
            "127.0.0.1:0",
            make_context(),
            control.clone() as Arc<dyn EventLoopControl>,
            None,
        )
        .unwrap();
        let addr = listen.local_addr().unwrap();

        let _client = TcpStream::connect(addr).unwrap();
        // Darle tiempo al kernel a encolar la conexión
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(listen.handle_event(EventSet::READ), TaskFlow::Continue);

        let added = control.calls().iter().any(|c| {
            matches!(
                c,
                ControlCall::TaskAdded {
                    readable: true,
                    writable: false,
                    ..
                }
            )
        });
        assert!(added, "la conexión aceptada no se registró");
    }

    #[test]
    fn test_empty_backlog_is_not_an_error() {
        let control = Arc::new(MockEventLoop::new());
        let mut listen = ListenTask::bind(
            "127.0.0.1:0",
            make_context(),
            control.clone() as Arc<dyn EventLoopControl>,
            None,
        )
        .unwrap();

        // Evento espurio sin conexiones pendientes
        assert_eq!(listen.handle_event(EventSet::READ), TaskFlow::Continue);
        assert!(control.calls().is_empty());
    }

    #[test]
    fn test_non_read_events_are_ignored() {
        let control = Arc::new(MockEventLoop::new());
        let mut listen = ListenTask::bind(
            "127.0.0.1:0",
            make_context(),
            control.clone() as Arc<dyn EventLoopControl>,
            None,
        )
        .unwrap();

        assert_eq!(listen.handle_event(EventSet::WRITE), TaskFlow::Continue);
        assert!(control.calls().is_empty());
    }
}
