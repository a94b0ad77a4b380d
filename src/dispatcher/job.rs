//! # Jobs y Handlers
//! src/dispatcher/job.rs
//!
//! Un [`Job`] empaqueta un request parseado junto con el [`Handler`] que
//! lo procesa y el canal de vuelta hacia su conexión. Los jobs viven en
//! la cola del dispatcher y se ejecutan en worker threads; la respuesta
//! vuelve al thread del event loop a través de un [`ResponseSink`].
//!
//! ## Ciclo de vida
//!
//! ```text
//! Pending ──> Running ──> Done      (respuesta entregada al sink)
//!                  │────> Requeue   (el handler pide reintentarlo)
//!                  │────> Detached  (submission async, sin respuesta)
//!                  └────> Failed    (error del handler o panic)
//! ```
//!
//! Un fallo nunca escapa del job: los errores del handler pasan por
//! `handle_error` y los panics se contienen con `catch_unwind`,
//! degradando a 500 Internal Server Error.

use crate::http::{HttpVersion, Request, Response, StatusCode};
use crate::server::event_loop::{EventLoopControl, EventToken};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Identificador único de un job
pub type JobId = u64;

/// Generador global de ids de job
static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Obtiene el siguiente id de job disponible
pub fn next_job_id() -> JobId {
    NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)
}

/// Clasificación de un job para el scheduling del dispatcher
///
/// Los jobs Write se serializan entre sí (monopolización); los Special
/// sacan a su thread del pool al terminar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    Read,
    Write,
    Special,
}

/// Estado observable de un job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Detached,
    Done,
    Requeue,
    Failed,
}

/// Error reportado por un handler
///
/// El handler tiene la oportunidad de convertirlo en una respuesta
/// propia vía `handle_error`; si no la toma, se degrada a 500.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub status: StatusCode,
    pub message: String,
}

impl HandlerError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InternalServerError, message)
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for HandlerError {}

/// Resultado de una ejecución exitosa del handler
#[derive(Debug)]
pub enum JobOutcome {
    /// Respuesta lista para entregar a la conexión
    Done(Response),
    /// Volver a encolar el job tras la espera indicada
    Requeue(Duration),
    /// El job continúa por fuera del dispatcher (submission async)
    Detached,
}

/// Contexto con el que se ejecuta un handler
pub struct JobContext {
    /// Request completo (headers + body)
    pub request: Request,

    /// Dirección del cliente, si la conexión la conoce
    pub client_address: Option<SocketAddr>,

    /// Flag cooperativo de cancelación: el handler debería consultarlo
    /// en puntos de corte de trabajos largos
    pub canceled: Arc<AtomicBool>,
}

impl JobContext {
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }
}

/// Lógica de aplicación que procesa un request
pub trait Handler: Send {
    /// Procesa el request y produce una respuesta (o pide requeue/detach)
    fn execute(&mut self, context: &JobContext) -> Result<JobOutcome, HandlerError>;

    /// Convierte un error propio en respuesta; por defecto un JSON de error
    fn handle_error(&mut self, error: &HandlerError) -> Response {
        Response::error(error.status, &error.message)
    }

    /// Clasificación del job para el scheduler
    fn job_type(&self) -> JobType {
        JobType::Read
    }
}

/// Fábrica de handlers: una por servidor, consultada por cada request
pub trait HandlerFactory: Send + Sync {
    fn create_handler(&self, request: &Request) -> Box<dyn Handler>;
}

/// Datos de la respuesta que dependen del request original
///
/// Se capturan en el momento del dispatch porque la conexión puede
/// estar procesando otro request cuando la respuesta vuelve.
#[derive(Debug, Clone)]
pub struct Disposition {
    /// El request fue HEAD: suprimir body preservando Content-Length
    pub head: bool,
    /// El cliente acepta gzip
    pub gzip: bool,
    /// Cerrar la conexión después de escribir esta respuesta
    pub close: bool,
    /// Versión a emitir en la status line
    pub version: HttpVersion,
    /// Header `origin` del request, para el echo de CORS
    pub origin: Option<String>,
    /// Momento en que el request quedó completo (para latencia)
    pub received: Instant,
}

impl Disposition {
    /// Captura la disposición a partir de un request parseado
    pub fn for_request(request: &Request) -> Self {
        Self {
            head: request.method() == crate::http::Method::HEAD,
            gzip: request.accepts_gzip(),
            close: request.requests_close(),
            version: request.version(),
            origin: request.origin().map(|s| s.to_string()),
            received: Instant::now(),
        }
    }
}

/// Una respuesta terminada, lista para que la conexión la serialice
#[derive(Debug)]
pub struct CompletedResponse {
    pub response: Response,
    pub disposition: Disposition,
}

/// Canal de entrega de respuestas hacia una conexión
///
/// Los workers lo usan desde sus threads: encolan la respuesta y
/// despiertan a la tarea de la conexión vía el event loop. La tarea
/// drena el sink al recibir el evento ASYNC.
#[derive(Clone)]
pub struct ResponseSink {
    queue: Arc<Mutex<VecDeque<CompletedResponse>>>,
    control: Arc<dyn EventLoopControl>,
    token: EventToken,
}

impl ResponseSink {
    pub fn new(control: Arc<dyn EventLoopControl>, token: EventToken) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            control,
            token,
        }
    }

    /// Entrega una respuesta y despierta a la conexión
    pub fn deliver(&self, completed: CompletedResponse) {
        match self.queue.lock() {
            Ok(mut queue) => queue.push_back(completed),
            Err(poisoned) => poisoned.into_inner().push_back(completed),
        }
        self.control.notify(self.token);
    }

    /// Drena todas las respuestas pendientes (desde el thread del reactor)
    pub fn drain(&self) -> Vec<CompletedResponse> {
        match self.queue.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }
}

/// Resultado de ejecutar un job en un worker
#[derive(Debug)]
pub enum JobProgress {
    /// Entregar esta respuesta al sink del job
    Done(Response),
    /// Re-encolar tras la espera indicada
    Requeue(Duration),
    /// El job siguió por fuera; no hay nada que entregar
    Detached,
}

/// Unidad de trabajo del dispatcher
pub struct Job {
    id: JobId,
    job_type: JobType,
    state: JobState,
    handler: Box<dyn Handler>,
    context: JobContext,
    /// Canal de vuelta; `None` para jobs detached de origen (async fire)
    sink: Option<ResponseSink>,
    disposition: Disposition,
}

impl Job {
    pub fn new(
        handler: Box<dyn Handler>,
        context: JobContext,
        sink: Option<ResponseSink>,
    ) -> Self {
        let disposition = Disposition::for_request(&context.request);
        let job_type = handler.job_type();
        Self {
            id: next_job_id(),
            job_type,
            state: JobState::Pending,
            handler,
            context,
            sink,
            disposition,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Flag compartido de cancelación cooperativa
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.context.canceled)
    }

    /// Ejecuta el handler con contención de fallos en tres niveles
    ///
    /// 1. `Err(HandlerError)` pasa por `handle_error` del propio handler.
    /// 2. Un panic con payload `&str`/`String` se loguea con su mensaje.
    /// 3. Cualquier otro payload se loguea como desconocido.
    ///
    /// En los niveles 2 y 3 la respuesta degrada a 500.
    pub fn work(&mut self) -> JobProgress {
        self.state = JobState::Running;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.handler.execute(&self.context)
        }));

        match result {
            Ok(Ok(JobOutcome::Done(response))) => {
                self.state = JobState::Done;
                JobProgress::Done(response)
            }
            Ok(Ok(JobOutcome::Requeue(delay))) => {
                self.state = JobState::Requeue;
                JobProgress::Requeue(delay)
            }
            Ok(Ok(JobOutcome::Detached)) => {
                self.state = JobState::Detached;
                JobProgress::Detached
            }
            Ok(Err(handler_error)) => {
                self.state = JobState::Failed;
                warn!(job_id = self.id, error = %handler_error, "handler reportó error");
                JobProgress::Done(self.handler.handle_error(&handler_error))
            }
            Err(payload) => {
                self.state = JobState::Failed;
                if let Some(message) = payload.downcast_ref::<&str>() {
                    error!(job_id = self.id, message, "panic en handler");
                } else if let Some(message) = payload.downcast_ref::<String>() {
                    error!(job_id = self.id, message = message.as_str(), "panic en handler");
                } else {
                    error!(job_id = self.id, "panic en handler con payload desconocido");
                }
                JobProgress::Done(Response::error(
                    StatusCode::InternalServerError,
                    "error interno procesando el request",
                ))
            }
        }
    }

    /// Marca el job como re-encolado (vuelve a Pending en la cola)
    pub fn reset_for_requeue(&mut self) {
        self.state = JobState::Pending;
    }

    /// Entrega una respuesta terminada a la conexión de origen
    ///
    /// Sin efecto para jobs sin sink (async fire): la respuesta se
    /// descarta, como corresponde a un job detached.
    pub fn deliver(&self, response: Response) {
        if let Some(sink) = &self.sink {
            sink.deliver(CompletedResponse {
                response,
                disposition: self.disposition.clone(),
            });
        }
    }
}

/// Fábrica mínima: siempre el mismo handler de eco JSON
///
/// Sirve como handler por defecto del binario y como fixture en tests.
pub struct StaticHandlerFactory;

impl HandlerFactory for StaticHandlerFactory {
    fn create_handler(&self, _request: &Request) -> Box<dyn Handler> {
        Box::new(EchoHandler)
    }
}

/// Handler que responde con un eco JSON del método y el path
struct EchoHandler;

impl Handler for EchoHandler {
    fn execute(&mut self, context: &JobContext) -> Result<JobOutcome, HandlerError> {
        let body = serde_json::json!({
            "method": context.request.method().as_str(),
            "path": context.request.path(),
        });
        Ok(JobOutcome::Done(Response::json(&body.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::event_loop::mock::MockEventLoop;

    // ==================== Helpers ====================

    fn make_context(raw: &[u8]) -> JobContext {
        JobContext {
            request: Request::parse_header(raw).unwrap(),
            client_address: None,
            canceled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn get_context() -> JobContext {
        make_context(b"GET /test HTTP/1.1\r\nhost: localhost\r\n\r\n")
    }

    struct OkHandler;
    impl Handler for OkHandler {
        fn execute(&mut self, _ctx: &JobContext) -> Result<JobOutcome, HandlerError> {
            Ok(JobOutcome::Done(Response::json("{}")))
        }
    }

    struct FailingHandler;
    impl Handler for FailingHandler {
        fn execute(&mut self, _ctx: &JobContext) -> Result<JobOutcome, HandlerError> {
            Err(HandlerError::new(StatusCode::NotFound, "no existe"))
        }
    }

    struct PanickingHandler;
    impl Handler for PanickingHandler {
        fn execute(&mut self, _ctx: &JobContext) -> Result<JobOutcome, HandlerError> {
            panic!("algo salió muy mal");
        }
    }

    // ==================== Ciclo de vida ====================

    #[test]
    fn test_job_ids_are_unique() {
        let a = Job::new(Box::new(OkHandler), get_context(), None);
        let b = Job::new(Box::new(OkHandler), get_context(), None);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_successful_job_is_done() {
        let mut job = Job::new(Box::new(OkHandler), get_context(), None);
        assert_eq!(job.state(), JobState::Pending);

        match job.work() {
            JobProgress::Done(response) => assert_eq!(response.status(), StatusCode::Ok),
            other => panic!("se esperaba Done, hubo {:?}", other),
        }
        assert_eq!(job.state(), JobState::Done);
    }

    #[test]
    fn test_handler_error_goes_through_handle_error() {
        let mut job = Job::new(Box::new(FailingHandler), get_context(), None);

        match job.work() {
            JobProgress::Done(response) => {
                assert_eq!(response.status(), StatusCode::NotFound);
            }
            other => panic!("se esperaba Done, hubo {:?}", other),
        }
        assert_eq!(job.state(), JobState::Failed);
    }

    #[test]
    fn test_panic_is_contained_as_500() {
        let mut job = Job::new(Box::new(PanickingHandler), get_context(), None);

        match job.work() {
            JobProgress::Done(response) => {
                assert_eq!(response.status(), StatusCode::InternalServerError);
            }
            other => panic!("se esperaba Done, hubo {:?}", other),
        }
        assert_eq!(job.state(), JobState::Failed);
    }

    #[test]
    fn test_requeue_resets_to_pending() {
        struct RequeueHandler;
        impl Handler for RequeueHandler {
            fn execute(&mut self, _ctx: &JobContext) -> Result<JobOutcome, HandlerError> {
                Ok(JobOutcome::Requeue(Duration::from_millis(5)))
            }
        }

        let mut job = Job::new(Box::new(RequeueHandler), get_context(), None);
        assert!(matches!(job.work(), JobProgress::Requeue(_)));
        assert_eq!(job.state(), JobState::Requeue);
        job.reset_for_requeue();
        assert_eq!(job.state(), JobState::Pending);
    }

    // ==================== Disposición y entrega ====================

    #[test]
    fn test_disposition_captures_head_and_close() {
        let context =
            make_context(b"HEAD /x HTTP/1.0\r\naccept-encoding: gzip\r\n\r\n");
        let job = Job::new(Box::new(OkHandler), context, None);
        assert!(job.disposition.head);
        assert!(job.disposition.gzip);
        assert!(job.disposition.close); // HTTP/1.0 sin keep-alive
        assert_eq!(job.disposition.version, HttpVersion::Http10);
    }

    #[test]
    fn test_sink_delivery_notifies_event_loop() {
        let control = Arc::new(MockEventLoop::new());
        let sink = ResponseSink::new(control.clone(), 7);
        let job = Job::new(Box::new(OkHandler), get_context(), Some(sink.clone()));

        job.deliver(Response::json("{}"));

        assert!(control.notified(7));
        let drained = sink.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].response.status(), StatusCode::Ok);
        // Segundo drain vacío
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn test_detached_job_discards_response() {
        let job = Job::new(Box::new(OkHandler), get_context(), None);
        // No hay sink: la entrega es un no-op y no paniquea
        job.deliver(Response::json("{}"));
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let job = Job::new(Box::new(OkHandler), get_context(), None);
        let flag = job.cancel_flag();
        assert!(!job.context.is_canceled());
        flag.store(true, Ordering::Relaxed);
        assert!(job.context.is_canceled());
    }
}
