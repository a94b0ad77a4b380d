//! # RedUnix HTTPD - Entry Point
//! src/main.rs
//!
//! Punto de entrada del servidor: parsea la configuración desde CLI y
//! variables de entorno, la valida, y corre el servidor con el handler
//! de eco por defecto hasta recibir una señal de terminación.

use redunix_httpd::auth::AllowAll;
use redunix_httpd::config::Config;
use redunix_httpd::dispatcher::StaticHandlerFactory;
use redunix_httpd::server::Server;
use std::sync::Arc;
use tracing::error;

fn main() {
    // RUST_LOG controla el filtro; info por defecto
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::new();
    if let Err(message) = config.validate() {
        error!("configuración inválida: {}", message);
        std::process::exit(1);
    }
    config.print_summary();

    let mut server = match Server::new(config, Arc::new(StaticHandlerFactory), Arc::new(AllowAll)) {
        Ok(server) => server,
        Err(e) => {
            error!("no se pudo iniciar el servidor: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        error!("error fatal del servidor: {}", e);
        std::process::exit(1);
    }
}
