//! # Reactor
//! src/server/reactor.rs
//!
//! Implementación de producción del event loop sobre `mio`: un único
//! thread multiplexa todos los descriptores registrados (listeners y
//! conexiones) con `Poll` en modo edge-triggered, mantiene los timers
//! de keep-alive en un heap y procesa comandos llegados de otros
//! threads a través de un canal más un `Waker`.
//!
//! Las tareas nunca tocan el `Poll`: toda mutación llega como
//! [`Command`] por el canal del [`ReactorHandle`], y el reactor la
//! aplica en su propio thread. Eso hace que `handle_event` corra
//! siempre sin sincronización, como promete [`EventTask`].

use crate::server::event_loop::{EventLoopControl, EventSet, EventTask, EventToken, TaskFlow};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Token reservado para el waker; los de tareas empiezan en 1
const WAKER_TOKEN: Token = Token(0);

/// Capacidad del buffer de eventos por iteración de poll
const EVENT_CAPACITY: usize = 256;

/// Comando encolado hacia el thread del reactor
enum Command {
    AddTask {
        token: EventToken,
        fd: RawFd,
        readable: bool,
        writable: bool,
        task: Box<dyn EventTask>,
    },
    SetInterest {
        token: EventToken,
        readable: bool,
        writable: bool,
    },
    ArmTimer {
        token: EventToken,
        timeout: Duration,
    },
    CancelTimer {
        token: EventToken,
    },
    Notify {
        token: EventToken,
    },
    CloseTask {
        token: EventToken,
    },
    Shutdown,
}

/// Entrada del heap de timers
///
/// El número de generación invalida entradas viejas sin sacarlas del
/// heap: re-armar o cancelar incrementa la generación del token, y las
/// entradas que no coinciden al vencer se descartan.
#[derive(PartialEq, Eq)]
struct TimerEntry {
    deadline: Instant,
    token: EventToken,
    generation: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.token.cmp(&other.token))
            .then_with(|| self.generation.cmp(&other.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct TaskEntry {
    fd: RawFd,
    task: Box<dyn EventTask>,
    /// Interés actualmente registrado en el poll; `None` = desregistrado
    interest: Option<Interest>,
}

/// Handle thread-safe hacia el reactor
///
/// Clonable vía `Arc`; los workers del dispatcher lo usan para
/// despertar a las comm tasks cuando hay respuestas listas.
pub struct ReactorHandle {
    sender: Sender<Command>,
    waker: Arc<Waker>,
    next_token: AtomicUsize,
}

impl ReactorHandle {
    fn send(&self, command: Command) {
        if self.sender.send(command).is_ok() {
            let _ = self.waker.wake();
        }
    }

    /// Pide al reactor que termine su loop
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }
}

impl EventLoopControl for ReactorHandle {
    fn add_task(
        &self,
        fd: RawFd,
        readable: bool,
        writable: bool,
        task: Box<dyn EventTask>,
    ) -> EventToken {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.send(Command::AddTask {
            token,
            fd,
            readable,
            writable,
            task,
        });
        token
    }

    fn set_interest(&self, token: EventToken, readable: bool, writable: bool) {
        self.send(Command::SetInterest {
            token,
            readable,
            writable,
        });
    }

    fn arm_timer(&self, token: EventToken, timeout: Duration) {
        self.send(Command::ArmTimer { token, timeout });
    }

    fn cancel_timer(&self, token: EventToken) {
        self.send(Command::CancelTimer { token });
    }

    fn notify(&self, token: EventToken) {
        self.send(Command::Notify { token });
    }

    fn close_task(&self, token: EventToken) {
        self.send(Command::CloseTask { token });
    }
}

/// Event loop de producción sobre `mio::Poll`
pub struct Reactor {
    poll: Poll,
    receiver: Receiver<Command>,
    tasks: HashMap<EventToken, TaskEntry>,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    /// Generación vigente por token; las demás entradas están muertas
    timer_generations: HashMap<EventToken, u64>,
    running: bool,
}

impl Reactor {
    /// Crea el reactor y su handle de control
    pub fn new() -> io::Result<(Self, Arc<ReactorHandle>)> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (sender, receiver) = mpsc::channel();
        let handle = Arc::new(ReactorHandle {
            sender,
            waker,
            next_token: AtomicUsize::new(1),
        });
        let reactor = Self {
            poll,
            receiver,
            tasks: HashMap::new(),
            timers: BinaryHeap::new(),
            timer_generations: HashMap::new(),
            running: false,
        };
        Ok((reactor, handle))
    }

    /// Loop principal: corre hasta recibir `Shutdown`
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENT_CAPACITY);
        self.running = true;

        while self.running {
            self.apply_commands();
            if !self.running {
                break;
            }
            self.fire_expired_timers();

            let timeout = self.next_timer_deadline().map(|deadline| {
                deadline.saturating_duration_since(Instant::now())
            });

            match self.poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                if event.token() == WAKER_TOKEN {
                    continue;
                }
                let token = event.token().0;
                let mut set = EventSet::empty();
                if event.is_readable() || event.is_read_closed() || event.is_error() {
                    set = set | EventSet::READ;
                }
                if event.is_writable() || event.is_write_closed() {
                    set = set | EventSet::WRITE;
                }
                if !set.is_empty() {
                    self.dispatch(token, set);
                }
            }
        }

        // Al salir se desregistra todo lo que quede vivo
        let tokens: Vec<EventToken> = self.tasks.keys().copied().collect();
        for token in tokens {
            self.remove_task(token);
        }
        Ok(())
    }

    /// Aplica todos los comandos pendientes del canal
    fn apply_commands(&mut self) {
        while let Ok(command) = self.receiver.try_recv() {
            match command {
                Command::AddTask {
                    token,
                    fd,
                    readable,
                    writable,
                    mut task,
                } => {
                    task.attached(token);
                    let mut entry = TaskEntry {
                        fd,
                        task,
                        interest: None,
                    };
                    if let Err(error) = Self::register(&self.poll, &mut entry, token, readable, writable) {
                        warn!(token, %error, "no se pudo registrar la tarea, se descarta");
                        continue;
                    }
                    trace!(token, fd, "tarea registrada");
                    self.tasks.insert(token, entry);
                }
                Command::SetInterest {
                    token,
                    readable,
                    writable,
                } => {
                    if let Some(entry) = self.tasks.get_mut(&token) {
                        if let Err(error) =
                            Self::register(&self.poll, entry, token, readable, writable)
                        {
                            warn!(token, %error, "no se pudo actualizar el interés");
                        }
                    }
                }
                Command::ArmTimer { token, timeout } => {
                    let generation = self
                        .timer_generations
                        .entry(token)
                        .and_modify(|g| *g += 1)
                        .or_insert(1);
                    self.timers.push(Reverse(TimerEntry {
                        deadline: Instant::now() + timeout,
                        token,
                        generation: *generation,
                    }));
                }
                Command::CancelTimer { token } => {
                    // Subir la generación deja muertas las entradas del
                    // heap. Nunca se remueve ni resetea: un re-arm
                    // posterior debe seguir por encima de las entradas
                    // viejas aún encoladas.
                    if let Some(generation) = self.timer_generations.get_mut(&token) {
                        *generation += 1;
                    }
                }
                Command::Notify { token } => {
                    self.dispatch(token, EventSet::ASYNC);
                }
                Command::CloseTask { token } => {
                    self.remove_task(token);
                }
                Command::Shutdown => {
                    self.running = false;
                    return;
                }
            }
        }
    }

    /// (Re)registra el fd de una entrada con el interés pedido
    ///
    /// Un interés vacío desregistra el fd: la tarea queda viva pero
    /// sin readiness hasta el próximo `set_interest` o evento ASYNC.
    fn register(
        poll: &Poll,
        entry: &mut TaskEntry,
        token: EventToken,
        readable: bool,
        writable: bool,
    ) -> io::Result<()> {
        let wanted = match (readable, writable) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        };
        if wanted == entry.interest {
            return Ok(());
        }

        let mut source = SourceFd(&entry.fd);
        match (entry.interest, wanted) {
            (None, Some(interest)) => {
                poll.registry().register(&mut source, Token(token), interest)?;
            }
            (Some(_), Some(interest)) => {
                poll.registry()
                    .reregister(&mut source, Token(token), interest)?;
            }
            (Some(_), None) => {
                poll.registry().deregister(&mut source)?;
            }
            (None, None) => {}
        }
        entry.interest = wanted;
        Ok(())
    }

    /// Entrega un evento a la tarea y aplica su decisión
    fn dispatch(&mut self, token: EventToken, events: EventSet) {
        let flow = match self.tasks.get_mut(&token) {
            Some(entry) => entry.task.handle_event(events),
            None => return,
        };
        if flow == TaskFlow::Close {
            self.remove_task(token);
        }
    }

    /// Desregistra y destruye una tarea; idempotente
    fn remove_task(&mut self, token: EventToken) {
        if let Some(entry) = self.tasks.remove(&token) {
            if entry.interest.is_some() {
                let mut source = SourceFd(&entry.fd);
                if let Err(error) = self.poll.registry().deregister(&mut source) {
                    debug!(token, %error, "deregister falló al cerrar la tarea");
                }
            }
            self.timer_generations.remove(&token);
            trace!(token, "tarea cerrada");
            // El drop de la tarea cierra el socket subyacente
        }
    }

    /// Vencimiento más próximo entre las entradas vivas del heap
    fn next_timer_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(entry)) = self.timers.peek() {
            let alive = self.timer_generations.get(&entry.token) == Some(&entry.generation)
                && self.tasks.contains_key(&entry.token);
            if alive {
                return Some(entry.deadline);
            }
            self.timers.pop();
        }
        None
    }

    /// Dispara los timers vencidos como eventos TIMER
    fn fire_expired_timers(&mut self) {
        let now = Instant::now();
        loop {
            match self.timers.peek() {
                Some(Reverse(entry)) if entry.deadline <= now => {}
                _ => break,
            }
            let Reverse(entry) = match self.timers.pop() {
                Some(e) => e,
                None => break,
            };
            let alive = self.timer_generations.get(&entry.token) == Some(&entry.generation);
            if !alive {
                continue;
            }
            // Consumido: un timer armado dispara a lo sumo una vez.
            // La generación se sube (no se remueve) por la misma razón
            // que en la cancelación.
            if let Some(generation) = self.timer_generations.get_mut(&entry.token) {
                *generation += 1;
            }
            self.dispatch(entry.token, EventSet::TIMER);
        }
    }
}
