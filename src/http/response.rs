//! # Construcción de Respuestas HTTP
//! src/http/response.rs
//!
//! API para construir respuestas HTTP de forma programática y
//! serializarlas a bytes listos para el write buffer de la comm task.
//!
//! ## Formato de una respuesta
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Type: application/json\r\n
//! Content-Length: 13\r\n
//! Connection: keep-alive\r\n
//! \r\n
//! {"ok": true}
//! ```
//!
//! La serialización contempla tres variantes:
//! - normal: `Content-Length` calculado del body;
//! - chunked: `Transfer-Encoding: chunked`, body en chunks
//!   `len-hex\r\npayload\r\n` con terminador `0\r\n\r\n`;
//! - HEAD: headers completos (incluido `Content-Length`) sin body.

use super::{HttpVersion, StatusCode};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::Write;

/// Representa una respuesta HTTP completa
#[derive(Debug, Clone)]
pub struct Response {
    /// Código de estado HTTP
    status: StatusCode,

    /// Headers HTTP (nombre en minúsculas para evitar duplicados)
    headers: HashMap<String, String>,

    /// Cuerpo de la respuesta (puede ser vacío)
    body: Vec<u8>,

    /// Versión a emitir en la status line
    version: HttpVersion,

    /// Serializar el body con chunked transfer encoding
    chunked: bool,
}

impl Response {
    /// Crea una nueva respuesta con el código de estado especificado
    ///
    /// # Ejemplo
    /// ```
    /// use redunix_httpd::http::{Response, StatusCode};
    ///
    /// let response = Response::new(StatusCode::Ok);
    /// ```
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
            version: HttpVersion::Http11,
            chunked: false,
        }
    }

    /// Agrega un header a la respuesta (builder)
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.add_header(name, value);
        self
    }

    /// Agrega un header a una respuesta existente
    ///
    /// Si el header ya existe, se sobrescribe.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_lowercase(), value.to_string());
    }

    /// Establece el cuerpo de la respuesta desde un string
    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.as_bytes().to_vec();
        self
    }

    /// Establece el cuerpo de la respuesta desde bytes
    pub fn with_body_bytes(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Fija la versión HTTP de la status line
    pub fn with_version(mut self, version: HttpVersion) -> Self {
        self.version = version;
        self
    }

    /// Activa chunked transfer encoding para el body
    pub fn set_chunked(&mut self) {
        self.chunked = true;
    }

    /// Crea una respuesta JSON exitosa (200 OK)
    ///
    /// # Ejemplo
    /// ```
    /// use redunix_httpd::http::Response;
    ///
    /// let response = Response::json(r#"{"status": "ok"}"#);
    /// ```
    pub fn json(body: &str) -> Self {
        Self::new(StatusCode::Ok)
            .with_header("Content-Type", "application/json")
            .with_body(body)
    }

    /// Crea una respuesta de error con cuerpo JSON
    ///
    /// Formato: `{"error": true, "code": 503, "message": "..."}`
    pub fn error(status: StatusCode, message: &str) -> Self {
        let body = serde_json::json!({
            "error": true,
            "code": status.as_u16(),
            "message": message,
        });
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(&body.to_string())
    }

    /// Comprime el body con gzip y marca `Content-Encoding`
    ///
    /// No hace nada si el body está vacío o la respuesta es chunked.
    pub fn compress_body(&mut self) {
        if self.body.is_empty() || self.chunked {
            return;
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        // Escribir sobre un Vec no puede fallar
        if encoder.write_all(&self.body).is_ok() {
            if let Ok(compressed) = encoder.finish() {
                self.body = compressed;
                self.add_header("Content-Encoding", "gzip");
            }
        }
    }

    /// Serializa la respuesta a bytes
    ///
    /// `suppress_body` se usa para responder a `HEAD`: los headers se
    /// emiten completos (incluido `Content-Length`) pero el body se
    /// omite.
    pub fn to_bytes(&self, suppress_body: bool) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.body.len() + 256);

        // 1. Status line
        let status_line = format!("{} {}\r\n", self.version.as_str(), self.status);
        result.extend_from_slice(status_line.as_bytes());

        // 2. Headers del caller
        for (name, value) in &self.headers {
            let header_line = format!("{}: {}\r\n", name, value);
            result.extend_from_slice(header_line.as_bytes());
        }

        // 3. Framing del body
        if self.chunked {
            result.extend_from_slice(b"transfer-encoding: chunked\r\n\r\n");
            if !suppress_body {
                Self::write_chunked(&mut result, &self.body);
            }
        } else if self.status.allows_body() {
            let length_line = format!("content-length: {}\r\n\r\n", self.body.len());
            result.extend_from_slice(length_line.as_bytes());
            if !suppress_body {
                result.extend_from_slice(&self.body);
            }
        } else {
            // 1xx / 204: sin Content-Length ni body
            result.extend_from_slice(b"\r\n");
        }

        result
    }

    /// Emite el body como un chunk más el chunk terminador
    fn write_chunked(out: &mut Vec<u8>, body: &[u8]) {
        if !body.is_empty() {
            out.extend_from_slice(format!("{:x}\r\n", body.len()).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"0\r\n\r\n");
    }

    /// Obtiene el código de estado de la respuesta
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Obtiene un header (nombre case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// Obtiene una referencia a los headers
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Obtiene una referencia al body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Indica si la respuesta usa chunked encoding
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_new_response() {
        let response = Response::new(StatusCode::Ok);
        assert_eq!(response.status(), StatusCode::Ok);
        assert!(response.headers().is_empty());
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_with_header_case_insensitive() {
        let response = Response::new(StatusCode::Ok)
            .with_header("Content-Type", "text/plain")
            .with_header("X-Custom", "value");

        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(response.header("X-CUSTOM"), Some("value"));
    }

    #[test]
    fn test_to_bytes_sets_content_length() {
        let response = Response::new(StatusCode::Ok).with_body("Test");
        let text = String::from_utf8(response.to_bytes(false)).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 4\r\n"));
        assert!(text.ends_with("\r\n\r\nTest"));
    }

    #[test]
    fn test_http10_status_line() {
        let response = Response::new(StatusCode::Ok)
            .with_version(HttpVersion::Http10)
            .with_body("x");
        let text = String::from_utf8(response.to_bytes(false)).unwrap();
        assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
    }

    #[test]
    fn test_error_response() {
        let response = Response::error(StatusCode::ServiceUnavailable, "queue full");

        assert_eq!(response.status(), StatusCode::ServiceUnavailable);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], true);
        assert_eq!(body["code"], 503);
        assert_eq!(body["message"], "queue full");
    }

    #[test]
    fn test_head_suppresses_body_keeps_length() {
        let response = Response::new(StatusCode::Ok).with_body("Hello");
        let text = String::from_utf8(response.to_bytes(true)).unwrap();

        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(!text.contains("Hello"));
    }

    #[test]
    fn test_no_content_has_no_length() {
        let response = Response::new(StatusCode::NoContent);
        let text = String::from_utf8(response.to_bytes(false)).unwrap();
        assert!(!text.contains("content-length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_chunked_encoding() {
        let mut response = Response::new(StatusCode::Ok).with_body("Wikipedia");
        response.set_chunked();
        let text = String::from_utf8(response.to_bytes(false)).unwrap();

        assert!(text.contains("transfer-encoding: chunked\r\n"));
        assert!(!text.contains("content-length"));
        // 9 bytes => chunk "9\r\nWikipedia\r\n" + terminador
        assert!(text.contains("9\r\nWikipedia\r\n"));
        assert!(text.ends_with("0\r\n\r\n"));
    }

    #[test]
    fn test_chunked_empty_body_only_terminator() {
        let mut response = Response::new(StatusCode::Ok);
        response.set_chunked();
        let text = String::from_utf8(response.to_bytes(false)).unwrap();
        assert!(text.ends_with("\r\n\r\n0\r\n\r\n") || text.ends_with("chunked\r\n\r\n0\r\n\r\n"));
    }

    #[test]
    fn test_gzip_roundtrip() {
        let original = "un body suficientemente repetitivo ".repeat(20);
        let mut response = Response::new(StatusCode::Ok).with_body(&original);
        response.compress_body();

        assert_eq!(response.header("content-encoding"), Some("gzip"));
        assert!(response.body().len() < original.len());

        let mut decoder = flate2::read::GzDecoder::new(response.body());
        let mut decompressed = String::new();
        decoder.read_to_string(&mut decompressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn test_gzip_skipped_for_empty_body() {
        let mut response = Response::new(StatusCode::Ok);
        response.compress_body();
        assert_eq!(response.header("content-encoding"), None);
    }
}
