//! # Worker del Dispatcher
//! src/dispatcher/thread.rs
//!
//! Loop principal de cada worker thread del pool. El worker pide el
//! próximo paso a la cola (que encapsula la elegibilidad y la
//! monopolización), ejecuta el job fuera del lock y enruta el
//! resultado: entrega de respuesta, requeue (inmediato o diferido) o
//! detach.
//!
//! La ejecución nunca deja escapar un fallo del handler: la contención
//! en tres niveles vive en [`Job::work`](super::job::Job::work) y este
//! loop solo interpreta el resultado.

use super::job::{JobProgress, JobType};
use super::queue::{DispatcherQueue, WorkerStep};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace};

/// Un worker del pool del dispatcher
pub struct DispatcherThread {
    queue: Arc<DispatcherQueue>,
}

impl DispatcherThread {
    pub(crate) fn new(queue: Arc<DispatcherQueue>) -> Self {
        Self { queue }
    }

    /// Loop principal del worker
    ///
    /// Corre hasta que la cola entre en shutdown, o hasta ejecutar un
    /// job Special (el thread deja el pool y la cola ya arrancó su
    /// reemplazo).
    pub(crate) fn main_loop(self) {
        self.queue.worker_entered();
        let me = thread::current().id();
        trace!(?me, "worker iniciado");

        loop {
            match self.queue.next_step(me) {
                WorkerStep::Stop => break,
                WorkerStep::Execute(mut job) => {
                    let job_id = job.id();
                    let specialized = job.job_type() == JobType::Special;
                    if specialized {
                        // Este thread deja el pool genérico; la cola
                        // arranca el reemplazo antes de ejecutar.
                        self.queue.specialize_thread();
                    }

                    let progress = job.work();

                    match progress {
                        JobProgress::Done(response) => {
                            self.queue.job_finished(me, job_id);
                            job.deliver(response);
                        }
                        JobProgress::Detached => {
                            // El job sigue por otro camino: no tocarlo más
                            self.queue.job_finished(me, job_id);
                        }
                        JobProgress::Requeue(delay) => {
                            self.queue.job_finished(me, job_id);
                            if delay.is_zero() {
                                self.queue.requeue(job);
                            } else {
                                debug!(job_id, ?delay, "requeue diferido");
                                let queue = Arc::clone(&self.queue);
                                // Timer simple: un thread efímero duerme y re-encola
                                let _ = thread::Builder::new()
                                    .name("dispatcher-requeue".to_string())
                                    .spawn(move || {
                                        thread::sleep(delay);
                                        queue.requeue(job);
                                    });
                            }
                        }
                    }

                    if specialized {
                        trace!(?me, "worker especializado, sale del pool");
                        return;
                    }
                }
            }
        }

        self.queue.worker_exited();
        trace!(?me, "worker detenido");
    }
}
