//! # Configuración del Servidor
//! src/config.rs
//!
//! Este módulo define la configuración del servidor HTTP(S) con soporte
//! completo para argumentos CLI y variables de entorno.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./redunix_httpd --port 8080 \
//!   --dispatcher-threads 8 \
//!   --queue-size 1024 \
//!   --keep-alive-secs 30
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! HTTP_PORT=8080 HTTP_HOST=0.0.0.0 ./redunix_httpd
//! ```
//!
//! ### TLS
//! ```bash
//! ./redunix_httpd --tls-port 8443 \
//!   --tls-cert ./certs/server.pem \
//!   --tls-key ./certs/server.key
//! ```

use clap::Parser;

/// Configuración del servidor HTTP(S)
#[derive(Debug, Clone, Parser)]
#[command(name = "redunix_httpd")]
#[command(about = "Servidor HTTP(S) event-driven con dispatcher de worker threads")]
#[command(version = "0.2.0")]
pub struct Config {
    /// Puerto en el que escucha el servidor
    #[arg(short, long, default_value = "8080", env = "HTTP_PORT")]
    pub port: u16,

    /// Host/IP en el que escucha
    #[arg(long, default_value = "127.0.0.1", env = "HTTP_HOST")]
    pub host: String,

    // === TLS ===

    /// Puerto HTTPS (0 = TLS deshabilitado)
    #[arg(long = "tls-port", default_value = "0", env = "TLS_PORT")]
    pub tls_port: u16,

    /// Ruta del certificado del servidor (PEM)
    #[arg(long = "tls-cert", default_value = "", env = "TLS_CERT")]
    pub tls_cert: String,

    /// Ruta de la clave privada del servidor (PEM)
    #[arg(long = "tls-key", default_value = "", env = "TLS_KEY")]
    pub tls_key: String,

    /// CA para verificación de certificados de cliente (PEM, opcional)
    #[arg(long = "tls-client-ca", default_value = "", env = "TLS_CLIENT_CA")]
    pub tls_client_ca: String,

    // === Dispatcher ===

    /// Número inicial de worker threads del dispatcher
    #[arg(long = "dispatcher-threads", default_value = "8", env = "DISPATCHER_THREADS")]
    pub dispatcher_threads: usize,

    /// Capacidad máxima de la cola del dispatcher (503 al llenarse)
    #[arg(long = "queue-size", default_value = "1024", env = "QUEUE_SIZE")]
    pub queue_size: usize,

    // === Límites de parsing ===

    /// Tamaño máximo del header block de un request en bytes
    #[arg(long = "max-header-size", default_value = "1048576", env = "MAX_HEADER_SIZE")]
    pub max_header_size: usize,

    /// Tamaño máximo del body declarado por Content-Length en bytes
    #[arg(long = "max-body-size", default_value = "536870912", env = "MAX_BODY_SIZE")]
    pub max_body_size: usize,

    /// Umbral de compactación del read buffer en bytes
    #[arg(long = "max-pipeline-size", default_value = "1048576", env = "MAX_PIPELINE_SIZE")]
    pub max_pipeline_size: usize,

    /// Requests pipelined antes de forzar compactación
    #[arg(long = "compact-every", default_value = "100", env = "COMPACT_EVERY")]
    pub compact_every: usize,

    // === Timeouts ===

    /// Timeout de keep-alive en segundos (0 = cerrar tras cada respuesta)
    #[arg(long = "keep-alive-secs", default_value = "300", env = "KEEP_ALIVE_SECS")]
    pub keep_alive_secs: u64,

    // === Compresión ===

    /// Tamaño mínimo del body para comprimir con gzip (0 = sin compresión)
    #[arg(long = "gzip-threshold", default_value = "1024", env = "GZIP_THRESHOLD")]
    pub gzip_threshold: usize,
}

impl Config {
    /// Crea una nueva configuración parseando argumentos CLI
    pub fn new() -> Self {
        Config::parse()
    }

    /// Obtiene la dirección completa para bind (host:port)
    ///
    /// # Ejemplo
    /// ```rust
    /// use redunix_httpd::config::Config;
    ///
    /// let config = Config::default();
    /// assert_eq!(config.address(), "127.0.0.1:8080");
    /// ```
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Dirección de bind del listener TLS
    pub fn tls_address(&self) -> String {
        format!("{}:{}", self.host, self.tls_port)
    }

    /// Indica si el listener TLS está habilitado
    pub fn tls_enabled(&self) -> bool {
        self.tls_port != 0
    }

    /// Valida la configuración
    ///
    /// Retorna errores si hay valores inválidos
    pub fn validate(&self) -> Result<(), String> {
        if self.dispatcher_threads == 0 {
            return Err("Dispatcher threads must be >= 1".to_string());
        }
        if self.queue_size == 0 {
            return Err("Queue size must be >= 1".to_string());
        }
        if self.max_header_size == 0 {
            return Err("Max header size must be > 0".to_string());
        }
        if self.max_pipeline_size == 0 {
            return Err("Max pipeline size must be > 0".to_string());
        }
        if self.compact_every == 0 {
            return Err("Compact-every must be >= 1".to_string());
        }

        if self.tls_enabled() {
            if self.tls_cert.is_empty() {
                return Err("TLS enabled but no certificate path given".to_string());
            }
            if self.tls_key.is_empty() {
                return Err("TLS enabled but no private key path given".to_string());
            }
            if self.tls_port == self.port {
                return Err("TLS port must differ from the HTTP port".to_string());
            }
        }

        Ok(())
    }

    /// Imprime un resumen de la configuración
    pub fn print_summary(&self) {
        println!("╔══════════════════════════════════════════════════════════════╗");
        println!("║            RedUnix HTTP(S) Server Configuration              ║");
        println!("╚══════════════════════════════════════════════════════════════╝");
        println!();
        println!("🌐 Network:");
        println!("   Address:       {}", self.address());
        if self.tls_enabled() {
            println!("   TLS address:   {}", self.tls_address());
            println!("   Certificate:   {}", self.tls_cert);
            if !self.tls_client_ca.is_empty() {
                println!("   Client CA:     {}", self.tls_client_ca);
            }
        } else {
            println!("   TLS:           disabled");
        }
        println!();
        println!("👷 Dispatcher:");
        println!("   Threads:       {}", self.dispatcher_threads);
        println!("   Queue size:    {} (503 when full)", self.queue_size);
        println!();
        println!("📏 Limits:");
        println!("   Header:        {} bytes", self.max_header_size);
        println!("   Body:          {} bytes", self.max_body_size);
        println!(
            "   Pipeline:      {} bytes / compact every {} requests",
            self.max_pipeline_size, self.compact_every
        );
        println!();
        println!("⏱  Timeouts & Compression:");
        if self.keep_alive_secs > 0 {
            println!("   Keep-alive:    {} s", self.keep_alive_secs);
        } else {
            println!("   Keep-alive:    disabled (close after response)");
        }
        if self.gzip_threshold > 0 {
            println!("   Gzip:          bodies >= {} bytes", self.gzip_threshold);
        } else {
            println!("   Gzip:          disabled");
        }
        println!();
        println!("═══════════════════════════════════════════════════════════════");
        println!();
    }
}

impl Default for Config {
    /// Configuración por defecto
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            tls_port: 0,
            tls_cert: String::new(),
            tls_key: String::new(),
            tls_client_ca: String::new(),
            dispatcher_threads: 8,
            queue_size: 1024,
            max_header_size: 1024 * 1024,
            max_body_size: 512 * 1024 * 1024,
            max_pipeline_size: 1024 * 1024,
            compact_every: 100,
            keep_alive_secs: 300,
            gzip_threshold: 1024,
        }
    }
}
