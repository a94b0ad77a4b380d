//! # Tarea de Comunicación HTTP
//! src/server/comm.rs
//!
//! Máquina de estados de una conexión HTTP sobre un socket
//! no-bloqueante. La tarea nunca bloquea: acumula bytes en el
//! [`ReadBuffer`] hasta reconocer el terminador `\r\n\r\n`, valida el
//! request, espera el body declarado por `Content-Length` y recién
//! entonces despacha un job al dispatcher. Las respuestas vuelven por
//! el [`ResponseSink`] con un wakeup asíncrono del event loop.
//!
//! ## Estados de lectura
//!
//! ```text
//! AwaitingHeader ──terminador──> AwaitingBody ──body completo──┐
//!       ▲                                                      │
//!       └───────────────── dispatch del job ◄──────────────────┘
//! ```
//!
//! Los errores de protocolo (431/505/414/405/411/400/413) escriben su
//! respuesta y fuerzan el cierre del socket: tras un header corrupto la
//! posición del stream deja de ser confiable para seguir pipelineando.
//! Los resultados de autenticación (401/403/404) y el backpressure
//! (503) responden sin cerrar, porque el stream sigue siendo válido.

use crate::auth::{AuthResult, Authenticator};
use crate::config::Config;
use crate::dispatcher::{
    CompletedResponse, Disposition, DispatcherQueue, HandlerFactory, Job, JobContext,
    ResponseSink,
};
use crate::http::{AsyncMode, Method, ParseError, Request, Response, StatusCode};
use crate::metrics::MetricsCollector;
use crate::server::buffer::{FillOutcome, FlushOutcome, ReadBuffer, WriteQueue};
use crate::server::event_loop::{
    EventLoopControl, EventSet, EventTask, EventToken, TaskFlow,
};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Métodos anunciados en el preflight CORS
const CORS_ALLOWED_METHODS: &str = "DELETE, GET, HEAD, OPTIONS, PATCH, POST, PUT";

/// Max-age fijo del preflight CORS, en segundos
const CORS_MAX_AGE: &str = "1800";

/// Colaboradores compartidos por todas las conexiones del servidor
pub struct ServerContext {
    pub config: Arc<Config>,
    pub dispatcher: Arc<DispatcherQueue>,
    pub factory: Arc<dyn HandlerFactory>,
    pub authenticator: Arc<dyn Authenticator>,
    pub metrics: MetricsCollector,
}

/// Datos de una conexión aceptada
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub peer: Option<SocketAddr>,
    pub local: Option<SocketAddr>,
    pub secure: bool,
}

/// Estado del parser de una conexión
enum ReadState {
    /// Buscando el terminador `\r\n\r\n`
    AwaitingHeader,
    /// Header completo; acumulando `body_length` bytes de body
    AwaitingBody {
        request: Box<Request>,
        body_length: usize,
    },
}

/// Decisión del procesamiento del buffer de lectura
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommFlow {
    Continue,
    /// Cierre abrupto: escribir lo pendiente best-effort y cerrar ya
    CloseForced,
}

/// Núcleo de la máquina de estados HTTP, compartido por la tarea plana
/// y la TLS
pub(crate) struct CommCore {
    context: Arc<ServerContext>,
    control: Arc<dyn EventLoopControl>,
    info: ConnectionInfo,
    token: EventToken,
    pub(crate) read_buffer: ReadBuffer,
    write_queue: WriteQueue,
    state: ReadState,
    /// Canal de respuestas, creado al primer dispatch
    sink: Option<ResponseSink>,
    /// Jobs despachados cuya respuesta todavía no volvió
    outstanding: usize,
    /// Cierre cooperativo: terminar de escribir y cerrar
    close_requested: bool,
    /// Ya se envió el 100 Continue interino del request en curso
    continue_sent: bool,
    /// Último interés registrado, para no repetir comandos
    last_interest: (bool, bool),
}

impl CommCore {
    pub(crate) fn new(
        context: Arc<ServerContext>,
        control: Arc<dyn EventLoopControl>,
        info: ConnectionInfo,
    ) -> Self {
        context.metrics.connection_opened();
        Self {
            context,
            control,
            info,
            token: 0,
            read_buffer: ReadBuffer::new(),
            write_queue: WriteQueue::new(),
            state: ReadState::AwaitingHeader,
            sink: None,
            outstanding: 0,
            close_requested: false,
            continue_sent: false,
            last_interest: (true, false),
        }
    }

    pub(crate) fn attach(&mut self, token: EventToken) {
        self.token = token;
    }

    pub(crate) fn token(&self) -> EventToken {
        self.token
    }

    /// Procesa todo lo acumulado en el read buffer
    ///
    /// Itera mientras haya requests completos (pipelining): cada request
    /// completo se despacha antes de mirar el siguiente.
    pub(crate) fn process_buffer(&mut self) -> CommFlow {
        loop {
            let awaited_body = match &self.state {
                ReadState::AwaitingHeader => None,
                ReadState::AwaitingBody { body_length, .. } => Some(*body_length),
            };

            match awaited_body {
                None => {
                    let body_start = match self.read_buffer.find_header_end() {
                        Some(pos) => pos,
                        None => {
                            // Header sin terminador dentro del límite: error duro
                            if self.read_buffer.header_bytes_pending()
                                > self.context.config.max_header_size
                            {
                                warn!(peer = ?self.info.peer, "header excede el máximo");
                                self.queue_error(
                                    StatusCode::HeaderFieldsTooLarge,
                                    "request header fields too large",
                                );
                                return CommFlow::CloseForced;
                            }
                            return CommFlow::Continue;
                        }
                    };

                    // Un request nuevo desactiva el timer de keep-alive
                    self.control.cancel_timer(self.token);
                    self.read_buffer.set_body_position(body_start);

                    let request = match Request::parse_header(self.read_buffer.header_block()) {
                        Ok(request) => request,
                        Err(error) => {
                            let status = Self::protocol_error_status(&error);
                            debug!(peer = ?self.info.peer, %error, "request inválido");
                            self.queue_error(status, &error.to_string());
                            return CommFlow::CloseForced;
                        }
                    };

                    let body_length = request.content_length().unwrap_or(0);
                    if body_length > 0 && !request.method().allows_body() {
                        // GET/HEAD con body anunciado: no hay forma
                        // confiable de reencuadrar el stream
                        self.queue_error(
                            StatusCode::BadRequest,
                            "request body not allowed for this method",
                        );
                        return CommFlow::CloseForced;
                    }
                    if body_length > self.context.config.max_body_size {
                        self.queue_error(StatusCode::PayloadTooLarge, "body too large");
                        return CommFlow::CloseForced;
                    }

                    if body_length > 0 {
                        // Interino 100 Continue antes de esperar el body
                        if request.expects_continue() && !self.continue_sent {
                            let interim = Response::new(StatusCode::Continue)
                                .with_version(request.version());
                            self.write_queue.push(interim.to_bytes(false));
                            self.continue_sent = true;
                        }
                        self.state = ReadState::AwaitingBody {
                            request: Box::new(request),
                            body_length,
                        };
                    } else {
                        self.read_buffer.consume_request(0);
                        if let CommFlow::CloseForced = self.complete_request(request) {
                            return CommFlow::CloseForced;
                        }
                    }
                }
                Some(body_length) => {
                    if self.read_buffer.body_available() < body_length {
                        return CommFlow::Continue;
                    }
                    let body = self.read_buffer.take_body(body_length);
                    let mut request = match std::mem::replace(
                        &mut self.state,
                        ReadState::AwaitingHeader,
                    ) {
                        ReadState::AwaitingBody { request, .. } => *request,
                        ReadState::AwaitingHeader => unreachable!(),
                    };
                    request.set_body(body);
                    self.read_buffer.consume_request(body_length);
                    self.continue_sent = false;
                    if let CommFlow::CloseForced = self.complete_request(request) {
                        return CommFlow::CloseForced;
                    }
                }
            }

            if self.close_requested {
                // No seguir parseando requests pipelined tras decidir el cierre
                return CommFlow::Continue;
            }

            self.maybe_compact();
        }
    }

    /// Mapea un error de parsing a su status de protocolo
    fn protocol_error_status(error: &ParseError) -> StatusCode {
        match error {
            ParseError::UnsupportedMethod(_) => StatusCode::MethodNotAllowed,
            ParseError::InvalidHttpVersion(_) => StatusCode::HttpVersionNotSupported,
            ParseError::UriTooLong(_) => StatusCode::UriTooLong,
            ParseError::InvalidContentLength(_) => StatusCode::LengthRequired,
            ParseError::InvalidRequestLine | ParseError::InvalidHeader(_) => {
                StatusCode::BadRequest
            }
        }
    }

    /// Un request quedó completo: decidir keep-alive, autenticar y despachar
    fn complete_request(&mut self, request: Request) -> CommFlow {
        trace!(peer = ?self.info.peer, method = request.method().as_str(),
               path = request.path(), "request completo");

        if request.requests_close() || self.context.config.keep_alive_secs == 0 {
            self.close_requested = true;
        }

        // El preflight CORS se responde acá mismo, sin autenticación
        if request.method() == Method::OPTIONS {
            self.queue_preflight(&request);
            return CommFlow::Continue;
        }

        match self.context.authenticator.authenticate(&request) {
            AuthResult::Granted => {}
            AuthResult::Unauthorized => {
                let realm = format!(
                    "Basic realm=\"{}\"",
                    self.context.authenticator.realm()
                );
                let response = Response::error(StatusCode::Unauthorized, "unauthorized")
                    .with_header("WWW-Authenticate", &realm);
                self.queue_local(response, Disposition::for_request(&request));
                return CommFlow::Continue;
            }
            AuthResult::Forbidden => {
                let response = Response::error(StatusCode::Forbidden, "forbidden");
                self.queue_local(response, Disposition::for_request(&request));
                return CommFlow::Continue;
            }
            AuthResult::NotFound => {
                let response = Response::error(StatusCode::NotFound, "not found");
                self.queue_local(response, Disposition::for_request(&request));
                return CommFlow::Continue;
            }
        }

        self.dispatch(request);
        CommFlow::Continue
    }

    /// Construye el job y lo somete al dispatcher
    fn dispatch(&mut self, request: Request) {
        let async_mode = request.async_mode();
        let disposition = Disposition::for_request(&request);
        let handler = self.context.factory.create_handler(&request);
        let job_context = JobContext {
            request,
            client_address: self.info.peer,
            canceled: Arc::new(AtomicBool::new(false)),
        };

        match async_mode {
            Some(mode) => {
                // Submission async: 202 inmediato, el job corre detached
                let job = Job::new(handler, job_context, None);
                let job_id = job.id();
                if !self.context.dispatcher.add_job(job) {
                    self.queue_local(
                        Response::error(StatusCode::ServiceUnavailable, "queue full"),
                        disposition,
                    );
                    return;
                }
                let mut accepted = Response::new(StatusCode::Accepted);
                if mode == AsyncMode::Store {
                    accepted.add_header("x-arango-async-id", &job_id.to_string());
                }
                self.queue_local(accepted, disposition);
            }
            None => {
                let control = Arc::clone(&self.control);
                let token = self.token;
                let sink = self
                    .sink
                    .get_or_insert_with(|| ResponseSink::new(control, token))
                    .clone();
                let job = Job::new(handler, job_context, Some(sink));
                if self.context.dispatcher.add_job(job) {
                    self.outstanding += 1;
                } else {
                    debug!(peer = ?self.info.peer, "dispatcher lleno, 503");
                    self.queue_local(
                        Response::error(StatusCode::ServiceUnavailable, "queue full"),
                        disposition,
                    );
                }
            }
        }
    }

    /// Respuesta directa al preflight CORS
    ///
    /// El preflight no ecoa `access-control-allow-origin`: solo anuncia
    /// métodos, headers pedidos y max-age.
    fn queue_preflight(&mut self, request: &Request) {
        let mut response = Response::new(StatusCode::Ok)
            .with_header("access-control-allow-methods", CORS_ALLOWED_METHODS)
            .with_header("access-control-max-age", CORS_MAX_AGE);
        if let Some(requested) = request.access_control_request_headers() {
            response.add_header("access-control-allow-headers", requested);
        }

        let mut disposition = Disposition::for_request(request);
        disposition.origin = None;
        self.queue_local(response, disposition);
    }

    /// Encola una respuesta de error generada localmente
    ///
    /// No ajusta headers CORS ni comprime: son respuestas de protocolo
    /// previas a tener un request confiable.
    fn queue_error(&mut self, status: StatusCode, message: &str) {
        let response = Response::error(status, message).with_header("connection", "close");
        self.context
            .metrics
            .record_request(status.as_u16(), Duration::ZERO);
        self.write_queue.push(response.to_bytes(false));
    }

    /// Encola una respuesta generada en el thread del event loop
    fn queue_local(&mut self, response: Response, disposition: Disposition) {
        self.add_response(CompletedResponse {
            response,
            disposition,
        });
    }

    /// Drena el sink de respuestas de los workers (evento ASYNC)
    pub(crate) fn drain_responses(&mut self) {
        if let Some(sink) = self.sink.clone() {
            for completed in sink.drain() {
                self.outstanding = self.outstanding.saturating_sub(1);
                self.add_response(completed);
            }
        }
    }

    /// Serializa una respuesta terminada hacia la write queue
    ///
    /// Aplica los headers CORS si el request traía `Origin`, fija el
    /// header `Connection` según la decisión de keep-alive, comprime si
    /// el cliente lo acepta y suprime el body de los HEAD.
    pub(crate) fn add_response(&mut self, completed: CompletedResponse) {
        let CompletedResponse {
            mut response,
            disposition,
        } = completed;

        if let Some(origin) = &disposition.origin {
            response.add_header("access-control-allow-origin", origin);
            response.add_header("access-control-allow-credentials", "true");
            response.add_header("access-control-expose-headers", "x-arango-async-id");
        }

        if disposition.close {
            self.close_requested = true;
        }
        let closing = self.close_requested;
        response.add_header("connection", if closing { "close" } else { "keep-alive" });

        let threshold = self.context.config.gzip_threshold;
        if threshold > 0 && disposition.gzip && response.body().len() >= threshold {
            response.compress_body();
        }

        let response = response.with_version(disposition.version);
        self.context
            .metrics
            .record_request(response.status().as_u16(), disposition.received.elapsed());
        self.write_queue.push(response.to_bytes(disposition.head));
    }

    /// Escribe la write queue hacia el socket plano
    pub(crate) fn flush_plain<W: Write>(&mut self, writer: &mut W) -> io::Result<FlushOutcome> {
        self.write_queue.flush_to(writer)
    }

    pub(crate) fn has_pending_writes(&self) -> bool {
        !self.write_queue.is_empty()
    }

    /// Extrae el próximo bloque de bytes a escribir (camino TLS)
    pub(crate) fn write_queue(&mut self) -> &mut WriteQueue {
        &mut self.write_queue
    }

    /// La conexión puede cerrarse de forma ordenada
    pub(crate) fn ready_to_close(&self) -> bool {
        self.close_requested && self.write_queue.is_empty() && self.outstanding == 0
    }

    /// Compacta el read buffer pasado el umbral de pipeline
    fn maybe_compact(&mut self) {
        let config = &self.context.config;
        if self
            .read_buffer
            .should_compact(config.max_pipeline_size, config.compact_every)
        {
            let shift = self.read_buffer.compact();
            trace!(shift, "read buffer compactado");
        }
    }

    /// Actualiza el interés de readiness en el event loop
    ///
    /// Lectura mientras no se haya decidido cerrar; escritura solo con
    /// bytes pendientes.
    pub(crate) fn update_interest(&mut self) {
        let readable = !self.close_requested;
        let writable = !self.write_queue.is_empty();
        self.set_interest(readable, writable);
    }

    /// Registra un interés arbitrario, evitando comandos repetidos
    pub(crate) fn set_interest(&mut self, readable: bool, writable: bool) {
        if (readable, writable) != self.last_interest {
            self.control.set_interest(self.token, readable, writable);
            self.last_interest = (readable, writable);
        }
    }

    /// La conexión sigue interesada en leer requests nuevos
    pub(crate) fn wants_read(&self) -> bool {
        !self.close_requested
    }

    /// Re-arma el timer de keep-alive si la conexión quedó idle
    pub(crate) fn maybe_arm_keep_alive(&mut self) {
        let secs = self.context.config.keep_alive_secs;
        if secs > 0
            && !self.close_requested
            && self.write_queue.is_empty()
            && self.outstanding == 0
        {
            self.control
                .arm_timer(self.token, Duration::from_secs(secs));
        }
    }
}

impl Drop for CommCore {
    fn drop(&mut self) {
        self.context.metrics.connection_closed();
    }
}

/// Tarea de comunicación sobre un socket TCP plano
///
/// Genérica sobre el transporte para poder testearla con streams en
/// memoria; en producción `S` es [`TcpStream`] en modo no-bloqueante.
pub struct SocketCommTask<S: Read + Write + Send = TcpStream> {
    stream: S,
    core: CommCore,
}

impl<S: Read + Write + Send> SocketCommTask<S> {
    pub fn new(
        stream: S,
        context: Arc<ServerContext>,
        control: Arc<dyn EventLoopControl>,
        info: ConnectionInfo,
    ) -> Self {
        Self {
            stream,
            core: CommCore::new(context, control, info),
        }
    }
}

impl<S: Read + Write + Send> EventTask for SocketCommTask<S> {
    fn attached(&mut self, token: EventToken) {
        self.core.attach(token);
    }

    fn handle_event(&mut self, events: EventSet) -> TaskFlow {
        if events.contains(EventSet::TIMER) {
            debug!(token = self.core.token(), "keep-alive vencido, cierre forzado");
            return TaskFlow::Close;
        }

        if events.contains(EventSet::ASYNC) {
            self.core.drain_responses();
        }

        let mut peer_closed = false;
        if events.contains(EventSet::READ) {
            match self.core.read_buffer.fill_from(&mut self.stream) {
                Ok(FillOutcome::Progress) => {}
                Ok(FillOutcome::WouldBlock) => {}
                Ok(FillOutcome::Closed) => peer_closed = true,
                Err(error) => {
                    debug!(%error, "error de lectura, cerrando");
                    return TaskFlow::Close;
                }
            }

            if let CommFlow::CloseForced = self.core.process_buffer() {
                // Best effort: intentar escribir la respuesta de error
                let _ = self.core.flush_plain(&mut self.stream);
                return TaskFlow::Close;
            }
        }

        if let Err(error) = self.core.flush_plain(&mut self.stream) {
            debug!(%error, "error de escritura, cerrando");
            return TaskFlow::Close;
        }

        if peer_closed || self.core.ready_to_close() {
            return TaskFlow::Close;
        }

        self.core.update_interest();
        self.core.maybe_arm_keep_alive();
        TaskFlow::Continue
    }
}
