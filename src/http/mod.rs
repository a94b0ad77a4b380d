//! # Módulo HTTP
//!
//! Este módulo implementa el protocolo HTTP/1.0 y 1.1 desde cero, sin usar
//! librerías de alto nivel. Incluye:
//!
//! - Parsing incremental de requests (el header block llega en fragmentos)
//! - Construcción de responses HTTP
//! - Manejo de status codes
//! - Decisión de keep-alive según versión y headers
//!
//! ### Formato de Request
//!
//! ```text
//! GET /path?query=value HTTP/1.1\r\n
//! Header-Name: Header-Value\r\n
//! Another-Header: Value\r\n
//! \r\n
//! <body opcional de Content-Length bytes>
//! ```
//!
//! ### Formato de Response
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Type: application/json\r\n
//! Content-Length: 13\r\n
//! \r\n
//! {"ok": true}
//! ```

// Submódulos del módulo HTTP
pub mod request;   // Parsing de HTTP requests
pub mod response;  // Construcción de HTTP responses
pub mod status;    // Códigos de estado HTTP

// Re-exportamos los tipos principales para facilitar su uso
// Esto permite usar `http::Request` en vez de `http::request::Request`
pub use request::{AsyncMode, HttpVersion, Method, ParseError, Request, MAX_URL_LENGTH};
pub use response::Response;
pub use status::StatusCode;
