//! # Servidor
//! src/server/core.rs
//!
//! Raíz de composición: arma el contexto compartido, levanta el
//! dispatcher de workers, hace bind de los listeners (plano y TLS si
//! está configurado) y corre el reactor hasta que se pida el shutdown.

use crate::auth::Authenticator;
use crate::config::Config;
use crate::dispatcher::{DispatcherQueue, HandlerFactory};
use crate::metrics::MetricsCollector;
use crate::server::comm::ServerContext;
use crate::server::event_loop::EventLoopControl;
use crate::server::listen::ListenTask;
use crate::server::reactor::{Reactor, ReactorHandle};
use crate::server::tls::{self, TlsSetupError};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Fallos al construir o correr el servidor
#[derive(Debug)]
pub enum ServerError {
    /// Error de I/O (bind, poll)
    Io(io::Error),
    /// Error de setup TLS (certificados, clave, CA de clientes)
    Tls(TlsSetupError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Io(e) => write!(f, "error de I/O: {}", e),
            ServerError::Tls(e) => write!(f, "error de TLS: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}

impl From<TlsSetupError> for ServerError {
    fn from(e: TlsSetupError) -> Self {
        ServerError::Tls(e)
    }
}

/// Servidor HTTP(S) completo: reactor + listeners + dispatcher
pub struct Server {
    context: Arc<ServerContext>,
    reactor: Reactor,
    handle: Arc<ReactorHandle>,
    /// Dirección real del listener plano (útil con puerto 0)
    local_addr: SocketAddr,
    tls_addr: Option<SocketAddr>,
}

impl Server {
    /// Construye el servidor: bind de listeners incluido, sin threads
    /// todavía
    pub fn new(
        config: Config,
        factory: Arc<dyn HandlerFactory>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self, ServerError> {
        let config = Arc::new(config);
        let dispatcher = DispatcherQueue::new(config.queue_size);
        let context = Arc::new(ServerContext {
            config: Arc::clone(&config),
            dispatcher,
            factory,
            authenticator,
            metrics: MetricsCollector::new(),
        });

        let (reactor, handle) = Reactor::new()?;
        let control: Arc<dyn EventLoopControl> = handle.clone();

        let plain = ListenTask::bind(
            &config.address(),
            Arc::clone(&context),
            Arc::clone(&control),
            None,
        )?;
        let local_addr = plain.local_addr()?;
        let fd = plain.raw_fd();
        handle.add_task(fd, true, false, Box::new(plain));

        let tls_addr = if config.tls_enabled() {
            let tls_config = tls::load_server_config(&config)?;
            let secure = ListenTask::bind(
                &config.tls_address(),
                Arc::clone(&context),
                Arc::clone(&control),
                Some(tls_config),
            )?;
            let addr = secure.local_addr()?;
            let fd = secure.raw_fd();
            handle.add_task(fd, true, false, Box::new(secure));
            Some(addr)
        } else {
            None
        };

        Ok(Self {
            context,
            reactor,
            handle,
            local_addr,
            tls_addr,
        })
    }

    /// Dirección del listener plano
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Dirección del listener TLS, si existe
    pub fn tls_addr(&self) -> Option<SocketAddr> {
        self.tls_addr
    }

    /// Handle de control del reactor (para pedir shutdown desde afuera)
    pub fn handle(&self) -> Arc<ReactorHandle> {
        Arc::clone(&self.handle)
    }

    /// Contexto compartido (métricas, dispatcher)
    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.context)
    }

    /// Corre el servidor hasta que el handle pida shutdown
    ///
    /// Bloquea el thread actual con el loop del reactor. Al salir,
    /// drena el dispatcher: los jobs en vuelo terminan o se cancelan
    /// cooperativamente antes de retornar.
    pub fn run(&mut self) -> Result<(), ServerError> {
        self.context
            .dispatcher
            .start(self.context.config.dispatcher_threads);
        info!(
            address = %self.local_addr,
            workers = self.context.config.dispatcher_threads,
            "servidor iniciado"
        );

        let result = self.reactor.run();

        info!("reactor detenido, drenando el dispatcher");
        self.context.dispatcher.begin_shutdown();
        result?;
        Ok(())
    }
}
