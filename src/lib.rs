//! # RedUnix HTTPD
//! src/lib.rs
//!
//! Servidor HTTP(S) event-driven: un reactor no-bloqueante multiplexa
//! todas las conexiones mientras un dispatcher de worker threads
//! acotado ejecuta los handlers, con backpressure explícita cuando la
//! cola se llena.
//!
//! ## Arquitectura
//!
//! El servidor está dividido en módulos especializados:
//! - `http`: Parsing incremental y serialización de HTTP/1.x
//! - `server`: Reactor, tareas de escucha y de conexión (planas y TLS)
//! - `dispatcher`: Cola acotada de jobs y worker threads
//! - `auth`: Contrato de autenticación por request
//! - `config`: Configuración por CLI y variables de entorno
//! - `metrics`: Recolección de métricas de requests y conexiones
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use redunix_httpd::auth::AllowAll;
//! use redunix_httpd::config::Config;
//! use redunix_httpd::dispatcher::StaticHandlerFactory;
//! use redunix_httpd::server::Server;
//! use std::sync::Arc;
//!
//! let config = Config::default();
//! let mut server = Server::new(
//!     config,
//!     Arc::new(StaticHandlerFactory),
//!     Arc::new(AllowAll),
//! )
//! .expect("no se pudo crear el servidor");
//! server.run().expect("error fatal del servidor");
//! ```

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod http;
pub mod metrics;
pub mod server;
