//! # Módulo Dispatcher
//!
//! Pool de worker threads con cola acotada. Separa la ejecución de
//! handlers (potencialmente lenta y bloqueante) del event loop de I/O,
//! que nunca debe bloquear:
//!
//! - [`job`]: jobs, handlers y el canal de respuestas hacia la conexión
//! - [`queue`]: cola FIFO acotada con backpressure y contabilidad de threads
//! - [`thread`]: loop principal de cada worker
//!
//! ## Flujo de un request
//!
//! ```text
//! CommTask ──add_job──> DispatcherQueue ──next_step──> DispatcherThread
//!     ▲                                                       │
//!     └────────── ResponseSink + notify del event loop ◄──────┘
//! ```

pub mod job;
pub mod queue;
pub mod thread;

pub use job::{
    CompletedResponse, Disposition, Handler, HandlerError, HandlerFactory, Job, JobContext,
    JobId, JobOutcome, JobState, JobType, ResponseSink, StaticHandlerFactory,
};
pub use queue::{DispatcherQueue, QueueCounters};
pub use thread::DispatcherThread;
