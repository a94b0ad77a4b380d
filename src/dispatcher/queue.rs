//! # Cola del Dispatcher
//! src/dispatcher/queue.rs
//!
//! Cola FIFO acotada que alimenta al pool de worker threads. El punto
//! central es el contrato de backpressure: [`DispatcherQueue::add_job`]
//! retorna `false` cuando la cola está llena, y el caller traduce eso
//! en un 503 — nunca bloquea ni descarta en silencio.
//!
//! La cola también lleva la contabilidad de threads (running, waiting,
//! blocked, special, started) que alimenta la heurística de
//! crecimiento: si ningún thread está idle y los threads activos no
//! superan a los bloqueados, se arranca un worker extra antes de
//! encolar, para no deadlockear cuando todo el pool está bloqueado en
//! operaciones lentas.

use super::job::{Job, JobId, JobType};
use super::thread::DispatcherThread;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Intervalo del wait con timeout de los workers idle
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Reintentos del polling de shutdown (a 10ms cada uno)
const SHUTDOWN_POLLS: usize = 500;

/// Snapshot de la contabilidad de la cola
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCounters {
    /// Threads despiertos (ejecutando o por tomar un job)
    pub running: usize,
    /// Threads idle esperando trabajo
    pub waiting: usize,
    /// Threads que anunciaron una operación bloqueante
    pub blocked: usize,
    /// Threads que se especializaron y dejaron el pool
    pub special: usize,
    /// Threads arrancados que aún no entraron al loop
    pub started: usize,
    /// Jobs en la cola ready
    pub queued: usize,
}

/// Directiva para el loop de un worker
pub(crate) enum WorkerStep {
    /// Ejecutar este job fuera del lock
    Execute(Job),
    /// La cola está parando: salir del loop
    Stop,
}

/// Estado mutable protegido por el lock de la cola
struct QueueState {
    ready: VecDeque<Job>,
    stopping: bool,
    running: usize,
    waiting: usize,
    blocked: usize,
    special: usize,
    started: usize,
    /// Thread que monopoliza la cola mientras ejecuta un job Write
    monopolizer: Option<ThreadId>,
    /// Flags de cancelación de los jobs vivos (encolados o corriendo)
    cancel_flags: HashMap<JobId, Arc<AtomicBool>>,
}

/// Cola acotada con pool de workers de tamaño dinámico
pub struct DispatcherQueue {
    state: Mutex<QueueState>,
    job_ready: Condvar,
    max_size: usize,
}

impl DispatcherQueue {
    /// Crea la cola con capacidad `max_size`
    pub fn new(max_size: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                ready: VecDeque::new(),
                stopping: false,
                running: 0,
                waiting: 0,
                blocked: 0,
                special: 0,
                started: 0,
                monopolizer: None,
                cancel_flags: HashMap::new(),
            }),
            job_ready: Condvar::new(),
            max_size,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Arranca el pool inicial de workers
    pub fn start(self: &Arc<Self>, threads: usize) {
        let mut state = self.lock_state();
        for _ in 0..threads {
            self.start_thread(&mut state);
        }
        info!(threads, max_size = self.max_size, "dispatcher iniciado");
    }

    /// Arranca un worker adicional (caller sostiene el lock)
    fn start_thread(self: &Arc<Self>, state: &mut QueueState) {
        let queue = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("dispatcher-worker".to_string())
            .spawn(move || DispatcherThread::new(queue).main_loop());

        match spawned {
            Ok(_) => state.started += 1,
            Err(e) => error!(error = %e, "no se pudo arrancar un worker"),
        }
    }

    /// Encola un job; `false` significa backpressure (cola llena o parando)
    ///
    /// El caller debe convertir `false` en una respuesta de servidor
    /// ocupado: este método nunca bloquea.
    pub fn add_job(self: &Arc<Self>, job: Job) -> bool {
        let mut state = self.lock_state();

        if state.stopping {
            return false;
        }
        if state.ready.len() >= self.max_size {
            debug!(queued = state.ready.len(), "cola llena, job rechazado");
            return false;
        }

        // Crecimiento: sin threads idle y con los activos cubiertos por
        // los bloqueados, el pool no puede drenar — arrancar uno más.
        if state.waiting == 0 && state.running + state.started <= state.blocked {
            self.start_thread(&mut state);
        }

        state.cancel_flags.insert(job.id(), job.cancel_flag());
        state.ready.push_back(job);

        if state.waiting > 0 {
            self.job_ready.notify_one();
        }
        true
    }

    /// Cancela un job por id
    ///
    /// Si sigue encolado se remueve y destruye; si ya corre, se señala
    /// la cancelación cooperativa sobre su flag. Retorna `false` si el
    /// job no se conoce (ya terminó o nunca existió).
    pub fn cancel_job(&self, id: JobId) -> bool {
        let mut state = self.lock_state();

        if let Some(pos) = state.ready.iter().position(|job| job.id() == id) {
            let job = state.ready.remove(pos);
            state.cancel_flags.remove(&id);
            drop(state);
            drop(job);
            debug!(job_id = id, "job encolado cancelado");
            return true;
        }

        match state.cancel_flags.get(&id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                debug!(job_id = id, "cancelación cooperativa señalada");
                true
            }
            None => false,
        }
    }

    /// Anuncia que el thread actual entra en una operación bloqueante
    pub fn block_thread(&self) {
        let mut state = self.lock_state();
        state.blocked += 1;
    }

    /// Revierte [`block_thread`](Self::block_thread)
    pub fn unblock_thread(&self) {
        let mut state = self.lock_state();
        state.blocked = state.blocked.saturating_sub(1);
    }

    /// El thread actual deja el pool genérico y arranca su reemplazo
    pub fn specialize_thread(self: &Arc<Self>) {
        let mut state = self.lock_state();
        state.running = state.running.saturating_sub(1);
        state.special += 1;
        self.start_thread(&mut state);
    }

    /// Inicia el shutdown: cancela lo encolado y espera a que el pool drene
    ///
    /// Los jobs nunca arrancados se destruyen acá mismo; los que corren
    /// reciben la señal cooperativa y se espera su término con polling
    /// acotado.
    pub fn begin_shutdown(&self) {
        let drained = {
            let mut state = self.lock_state();
            state.stopping = true;
            let drained: Vec<Job> = state.ready.drain(..).collect();
            for job in &drained {
                state.cancel_flags.remove(&job.id());
            }
            for flag in state.cancel_flags.values() {
                flag.store(true, Ordering::Relaxed);
            }
            drained
        };
        let canceled = drained.len();
        drop(drained);
        self.job_ready.notify_all();

        for _ in 0..SHUTDOWN_POLLS {
            {
                let state = self.lock_state();
                if state.running == 0 && state.waiting == 0 && state.started == 0 {
                    info!(canceled, "dispatcher detenido");
                    return;
                }
            }
            self.job_ready.notify_all();
            thread::sleep(Duration::from_millis(10));
        }
        warn!("shutdown del dispatcher agotó los reintentos con threads vivos");
    }

    /// Snapshot de contadores para métricas y tests
    pub fn counters(&self) -> QueueCounters {
        let state = self.lock_state();
        QueueCounters {
            running: state.running,
            waiting: state.waiting,
            blocked: state.blocked,
            special: state.special,
            started: state.started,
            queued: state.ready.len(),
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.lock_state().stopping
    }

    // ==================== API interna de los workers ====================

    /// El worker entró a su main loop
    pub(crate) fn worker_entered(&self) {
        let mut state = self.lock_state();
        state.started = state.started.saturating_sub(1);
        state.running += 1;
    }

    /// El worker sale de su main loop
    pub(crate) fn worker_exited(&self) {
        let mut state = self.lock_state();
        state.running = state.running.saturating_sub(1);
    }

    /// Obtiene el próximo paso del worker, bloqueando si no hay trabajo
    ///
    /// Elegibilidad del job al frente:
    /// - si otro thread monopoliza la cola, esperar;
    /// - un job Write solo se toma si este es el único thread despierto,
    ///   y al tomarlo el thread pasa a monopolizar la cola.
    pub(crate) fn next_step(&self, me: ThreadId) -> WorkerStep {
        let mut state = self.lock_state();

        loop {
            if state.stopping {
                return WorkerStep::Stop;
            }

            let eligible = match state.ready.front() {
                Some(front) => {
                    if state.monopolizer.is_some() && state.monopolizer != Some(me) {
                        false
                    } else {
                        front.job_type() != JobType::Write || state.running <= 1
                    }
                }
                None => false,
            };

            if eligible {
                // front() acaba de confirmar que hay elemento
                if let Some(job) = state.ready.pop_front() {
                    if job.job_type() == JobType::Write {
                        state.monopolizer = Some(me);
                    }
                    return WorkerStep::Execute(job);
                }
            }

            state.waiting += 1;
            state.running = state.running.saturating_sub(1);
            let (guard, _timeout) = match self.job_ready.wait_timeout(state, IDLE_WAIT) {
                Ok(pair) => pair,
                Err(poisoned) => {
                    let (guard, timeout) = poisoned.into_inner();
                    (guard, timeout)
                }
            };
            state = guard;
            state.waiting = state.waiting.saturating_sub(1);
            state.running += 1;
        }
    }

    /// Contabilidad posterior a la ejecución de un job
    pub(crate) fn job_finished(&self, me: ThreadId, job_id: JobId) {
        let mut state = self.lock_state();
        state.cancel_flags.remove(&job_id);
        if state.monopolizer == Some(me) {
            state.monopolizer = None;
        }
        if !state.ready.is_empty() && state.waiting > 0 {
            self.job_ready.notify_one();
        }
    }

    /// Re-encola un job que pidió requeue (ignora el límite de tamaño)
    pub(crate) fn requeue(&self, mut job: Job) {
        job.reset_for_requeue();
        let mut state = self.lock_state();
        if state.stopping {
            return;
        }
        state.cancel_flags.insert(job.id(), job.cancel_flag());
        state.ready.push_back(job);
        if state.waiting > 0 {
            self.job_ready.notify_one();
        }
    }
}
