//! # Abstracción del Event Loop
//! src/server/event_loop.rs
//!
//! Contratos entre las tareas de I/O y el reactor que las multiplexa:
//!
//! - [`EventSet`]: bitmask de condiciones entregadas a una tarea
//!   (legible, escribible, timer vencido, notificación cross-thread).
//! - [`EventTask`]: una tarea dueña de un descriptor, manejada siempre
//!   desde el thread del event loop.
//! - [`EventLoopControl`]: handle thread-safe para mutar intereses,
//!   armar timers y despertar tareas desde otros threads (los workers
//!   del dispatcher lo usan para entregar respuestas).
//!
//! Las tareas nunca ven el poll directamente: el reactor traduce la
//! readiness del sistema operativo a un [`EventSet`] y delega.

use std::ops::BitOr;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Identificador estable de una tarea dentro del event loop
pub type EventToken = usize;

/// Conjunto de condiciones de un evento
///
/// # Ejemplo
/// ```
/// use redunix_httpd::server::event_loop::EventSet;
///
/// let events = EventSet::READ | EventSet::TIMER;
/// assert!(events.contains(EventSet::READ));
/// assert!(!events.contains(EventSet::WRITE));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSet(u8);

impl EventSet {
    /// El descriptor es legible (o hay una conexión por aceptar)
    pub const READ: EventSet = EventSet(0b0001);
    /// El descriptor es escribible
    pub const WRITE: EventSet = EventSet(0b0010);
    /// El timer asociado a la tarea venció
    pub const TIMER: EventSet = EventSet(0b0100);
    /// Otro thread pidió despertar a la tarea
    pub const ASYNC: EventSet = EventSet(0b1000);

    /// Conjunto vacío
    pub fn empty() -> Self {
        EventSet(0)
    }

    /// Verifica si todas las condiciones de `other` están presentes
    pub fn contains(&self, other: EventSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for EventSet {
    type Output = EventSet;

    fn bitor(self, rhs: EventSet) -> EventSet {
        EventSet(self.0 | rhs.0)
    }
}

/// Decisión de la tarea tras manejar un evento
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFlow {
    /// La tarea sigue viva y registrada
    Continue,
    /// La tarea terminó; el reactor la desregistra y la destruye
    Close,
}

/// Una tarea dueña de un descriptor, manejada por el event loop
///
/// `handle_event` corre siempre en el thread del reactor, por lo que la
/// tarea puede mutar su estado sin sincronización adicional.
pub trait EventTask: Send {
    /// El reactor asignó un token a la tarea al registrarla
    ///
    /// Se invoca exactamente una vez, antes del primer evento.
    fn attached(&mut self, _token: EventToken) {}

    fn handle_event(&mut self, events: EventSet) -> TaskFlow;
}

/// Handle thread-safe hacia el event loop
///
/// Todas las operaciones son asíncronas respecto del caller: encolan un
/// comando y despiertan al reactor, que las aplica en su propio thread.
pub trait EventLoopControl: Send + Sync {
    /// Registra una nueva tarea y retorna su token
    fn add_task(
        &self,
        fd: RawFd,
        readable: bool,
        writable: bool,
        task: Box<dyn EventTask>,
    ) -> EventToken;

    /// Cambia el interés de readiness de una tarea
    fn set_interest(&self, token: EventToken, readable: bool, writable: bool);

    /// Arma (o re-arma) el timer de una tarea
    fn arm_timer(&self, token: EventToken, timeout: Duration);

    /// Cancela el timer de una tarea si estaba armado
    fn cancel_timer(&self, token: EventToken);

    /// Despierta a una tarea con un evento ASYNC (seguro cross-thread)
    fn notify(&self, token: EventToken);

    /// Desregistra y destruye una tarea
    fn close_task(&self, token: EventToken);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_set_combination() {
        let events = EventSet::READ | EventSet::WRITE;
        assert!(events.contains(EventSet::READ));
        assert!(events.contains(EventSet::WRITE));
        assert!(!events.contains(EventSet::TIMER));
        assert!(!events.contains(EventSet::READ | EventSet::TIMER));
    }

    #[test]
    fn test_event_set_empty() {
        assert!(EventSet::empty().is_empty());
        assert!(!EventSet::READ.is_empty());
        // Todo conjunto contiene al vacío
        assert!(EventSet::READ.contains(EventSet::empty()));
    }
}
