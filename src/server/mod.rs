//! # Módulo Server
//! src/server/mod.rs
//!
//! Capa de red del servidor: el reactor que multiplexa descriptores,
//! las tareas de escucha y de conexión (planas y TLS), los buffers de
//! I/O incremental y la raíz de composición [`Server`].

pub mod buffer;
pub mod comm;
pub mod core;
pub mod event_loop;
pub mod listen;
pub mod reactor;
pub mod tls;

pub use comm::{ConnectionInfo, ServerContext, SocketCommTask};
pub use core::{Server, ServerError};
pub use event_loop::{EventLoopControl, EventSet, EventTask, EventToken, TaskFlow};
pub use listen::ListenTask;
pub use reactor::{Reactor, ReactorHandle};
pub use tls::TlsCommTask;
