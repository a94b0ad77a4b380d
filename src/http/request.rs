//! # Parsing del bloque de headers HTTP
//! src/http/request.rs
//!
//! Parser del bloque de headers de un request HTTP/1.0 o HTTP/1.1.
//!
//! A diferencia de un parser de mensajes completos, este módulo sólo
//! interpreta los bytes *hasta* el terminador `\r\n\r\n`. El body se
//! acumula aparte en el `ReadBuffer` de la comm task (que conoce el
//! `Content-Length`) y se adjunta después con [`Request::set_body`].
//!
//! ## Formato del bloque de headers
//!
//! ```text
//! GET /path?param=value HTTP/1.1\r\n
//! Host: localhost:8080\r\n
//! Content-Length: 13\r\n
//! \r\n
//! ```

use std::collections::HashMap;

/// Techo fijo para la longitud de la URL (bytes)
pub const MAX_URL_LENGTH: usize = 16384;

/// Métodos HTTP reconocidos por el núcleo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    GET,
    HEAD,
    POST,
    PUT,
    PATCH,
    DELETE,
    OPTIONS,
}

impl Method {
    /// Parsea un método HTTP desde un string
    ///
    /// # Errores
    ///
    /// Retorna error si el método no es reconocido. Un método desconocido
    /// es un error duro: el parser ya no puede determinar dónde termina
    /// el request y la conexión debe cerrarse de forma abrupta.
    fn from_str(s: &str) -> Result<Self, ParseError> {
        match s {
            "GET" => Ok(Method::GET),
            "HEAD" => Ok(Method::HEAD),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "PATCH" => Ok(Method::PATCH),
            "DELETE" => Ok(Method::DELETE),
            "OPTIONS" => Ok(Method::OPTIONS),
            _ => Err(ParseError::UnsupportedMethod(s.to_string())),
        }
    }

    /// Convierte el método a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::PATCH => "PATCH",
            Method::DELETE => "DELETE",
            Method::OPTIONS => "OPTIONS",
        }
    }

    /// Indica si el método admite body cuando hay `Content-Length`
    ///
    /// `POST/PUT/PATCH` lo esperan; `OPTIONS` y `DELETE` lo aceptan de
    /// forma permisiva. `GET/HEAD` nunca llevan body.
    pub fn allows_body(&self) -> bool {
        matches!(
            self,
            Method::POST | Method::PUT | Method::PATCH | Method::OPTIONS | Method::DELETE
        )
    }
}

/// Versión del protocolo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    fn from_str(s: &str) -> Result<Self, ParseError> {
        match s {
            "HTTP/1.0" => Ok(HttpVersion::Http10),
            "HTTP/1.1" => Ok(HttpVersion::Http11),
            _ => Err(ParseError::InvalidHttpVersion(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }
}

/// Modo de ejecución asíncrona solicitado con el header `x-arango-async`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncMode {
    /// `x-arango-async: true` - ejecutar sin esperar, sin guardar resultado
    Fire,
    /// `x-arango-async: store` - ejecutar sin esperar, devolviendo el job id
    Store,
}

/// Errores que pueden ocurrir durante el parsing del bloque de headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Formato inválido de la request line
    InvalidRequestLine,

    /// Método HTTP no reconocido (cierre abrupto obligatorio)
    UnsupportedMethod(String),

    /// Versión HTTP distinta de 1.0/1.1
    InvalidHttpVersion(String),

    /// URL más larga que el techo fijo
    UriTooLong(usize),

    /// Header malformado (sin ':')
    InvalidHeader(String),

    /// Content-Length negativo o ilegible
    InvalidContentLength(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidRequestLine => write!(f, "Invalid request line format"),
            ParseError::UnsupportedMethod(m) => write!(f, "Unsupported HTTP method: {}", m),
            ParseError::InvalidHttpVersion(v) => write!(f, "Unsupported HTTP version: {}", v),
            ParseError::UriTooLong(n) => write!(f, "URI too long: {} bytes", n),
            ParseError::InvalidHeader(h) => write!(f, "Invalid header: {}", h),
            ParseError::InvalidContentLength(v) => write!(f, "Invalid Content-Length: {}", v),
        }
    }
}

impl std::error::Error for ParseError {}

/// Representa un request con el bloque de headers ya parseado
///
/// Los nombres de headers se almacenan en minúsculas para que las
/// búsquedas sean case-insensitive, como exige el protocolo.
#[derive(Debug, Clone)]
pub struct Request {
    /// Método HTTP
    method: Method,

    /// Path de la petición (ej: "/estado")
    path: String,

    /// Query parameters parseados
    query_params: HashMap<String, String>,

    /// Headers HTTP con nombre en minúsculas
    headers: HashMap<String, String>,

    /// Versión del protocolo
    version: HttpVersion,

    /// Content-Length declarado (None si el header no vino)
    content_length: Option<usize>,

    /// Body, adjuntado por la comm task una vez acumulado
    body: Vec<u8>,
}

impl Request {
    /// Parsea el bloque de headers (todo lo anterior a `\r\n\r\n`)
    ///
    /// El slice puede incluir o no el terminador final; el body nunca
    /// debe venir incluido.
    ///
    /// # Ejemplo
    ///
    /// ```
    /// use redunix_httpd::http::Request;
    ///
    /// let raw = b"GET /estado?full=true HTTP/1.1\r\nHost: localhost\r\n\r\n";
    /// let request = Request::parse_header(raw).unwrap();
    ///
    /// assert_eq!(request.path(), "/estado");
    /// assert_eq!(request.query_param("full"), Some("true"));
    /// ```
    pub fn parse_header(buffer: &[u8]) -> Result<Self, ParseError> {
        let header_str =
            std::str::from_utf8(buffer).map_err(|_| ParseError::InvalidRequestLine)?;

        let mut lines = header_str.split("\r\n");

        let request_line = lines.next().ok_or(ParseError::InvalidRequestLine)?;
        let (method, path, query_params, version) = Self::parse_request_line(request_line)?;

        let headers = Self::parse_headers(lines)?;

        let content_length = match headers.get("content-length") {
            Some(raw) => Some(Self::parse_content_length(raw)?),
            None => None,
        };

        Ok(Request {
            method,
            path,
            query_params,
            headers,
            version,
            content_length,
            body: Vec::new(),
        })
    }

    /// Parsea la request line
    ///
    /// Formato: `GET /path?query HTTP/1.1`
    fn parse_request_line(
        line: &str,
    ) -> Result<(Method, String, HashMap<String, String>, HttpVersion), ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();

        // Debe tener exactamente 3 partes: METHOD PATH VERSION
        if parts.len() != 3 {
            return Err(ParseError::InvalidRequestLine);
        }

        let method = Method::from_str(parts[0])?;

        if parts[1].len() > MAX_URL_LENGTH {
            return Err(ParseError::UriTooLong(parts[1].len()));
        }
        let (path, query_params) = Self::parse_path_and_query(parts[1]);

        let version = HttpVersion::from_str(parts[2])?;

        Ok((method, path, query_params, version))
    }

    /// Parsea el path y extrae los query parameters
    fn parse_path_and_query(path_with_query: &str) -> (String, HashMap<String, String>) {
        if let Some(query_start) = path_with_query.find('?') {
            let path = path_with_query[..query_start].to_string();
            let query_string = &path_with_query[query_start + 1..];
            (path, Self::parse_query_string(query_string))
        } else {
            (path_with_query.to_string(), HashMap::new())
        }
    }

    /// Parsea una query string en un HashMap
    fn parse_query_string(query: &str) -> HashMap<String, String> {
        let mut params = HashMap::new();

        for param in query.split('&') {
            if param.is_empty() {
                continue;
            }

            if let Some(eq_pos) = param.find('=') {
                let key = &param[..eq_pos];
                let value = Self::url_decode(&param[eq_pos + 1..]);
                params.insert(key.to_string(), value);
            } else {
                // Parámetro sin valor (ej: "?debug")
                params.insert(param.to_string(), String::new());
            }
        }

        params
    }

    /// Decodifica una URL (convierte %20 a espacio, etc.)
    fn url_decode(s: &str) -> String {
        s.replace("%20", " ").replace('+', " ")
    }

    /// Parsea los headers, normalizando el nombre a minúsculas
    fn parse_headers<'a, I>(lines: I) -> Result<HashMap<String, String>, ParseError>
    where
        I: Iterator<Item = &'a str>,
    {
        let mut headers = HashMap::new();

        for line in lines {
            // La línea vacía marca el fin de los headers
            if line.trim().is_empty() {
                break;
            }

            if let Some(colon_pos) = line.find(':') {
                let name = line[..colon_pos].trim().to_lowercase();
                let value = line[colon_pos + 1..].trim().to_string();
                headers.insert(name, value);
            } else {
                return Err(ParseError::InvalidHeader(line.to_string()));
            }
        }

        Ok(headers)
    }

    /// Valida el valor de Content-Length
    ///
    /// Un valor negativo o no numérico es un error de protocolo (411).
    fn parse_content_length(raw: &str) -> Result<usize, ParseError> {
        let value: i64 = raw
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidContentLength(raw.to_string()))?;
        if value < 0 {
            return Err(ParseError::InvalidContentLength(raw.to_string()));
        }
        Ok(value as usize)
    }

    // === Accesores ===

    /// Obtiene el método HTTP del request
    pub fn method(&self) -> Method {
        self.method
    }

    /// Obtiene el path del request
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Obtiene un query parameter específico
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(|s| s.as_str())
    }

    /// Obtiene todos los query parameters
    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    /// Obtiene un header (búsqueda case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// Obtiene todos los headers
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Obtiene la versión HTTP
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// Content-Length declarado, si vino el header
    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Adjunta el body acumulado por la comm task
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// Obtiene el body del request
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    // === Decisiones derivadas de headers ===

    /// Decide si la conexión debe cerrarse tras responder
    ///
    /// Cierra si hay `Connection: close` explícito, o si es HTTP/1.0
    /// sin `Connection: keep-alive`.
    pub fn requests_close(&self) -> bool {
        match self.header("connection").map(|v| v.to_lowercase()) {
            Some(v) if v.contains("close") => true,
            Some(v) if v.contains("keep-alive") => false,
            _ => self.version == HttpVersion::Http10,
        }
    }

    /// Indica si el cliente pidió una respuesta interina `100 Continue`
    pub fn expects_continue(&self) -> bool {
        self.header("expect")
            .map(|v| v.eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false)
    }

    /// Header `Origin` registrado para CORS
    pub fn origin(&self) -> Option<&str> {
        self.header("origin")
    }

    /// Headers solicitados en el preflight CORS
    pub fn access_control_request_headers(&self) -> Option<&str> {
        self.header("access-control-request-headers")
    }

    /// Modo async solicitado con `x-arango-async`
    pub fn async_mode(&self) -> Option<AsyncMode> {
        match self.header("x-arango-async").map(|v| v.to_lowercase()) {
            Some(v) if v == "true" => Some(AsyncMode::Fire),
            Some(v) if v == "store" => Some(AsyncMode::Store),
            _ => None,
        }
    }

    /// Indica si el cliente acepta responses comprimidos con gzip
    pub fn accepts_gzip(&self) -> bool {
        self.header("accept-encoding")
            .map(|v| v.to_lowercase().contains("gzip"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\n\r\n";
        let request = Request::parse_header(raw).unwrap();

        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.path(), "/");
        assert_eq!(request.version(), HttpVersion::Http11);
        assert!(request.query_params().is_empty());
    }

    #[test]
    fn test_parse_with_query_params() {
        let raw = b"GET /estado?full=true&modo=rapido HTTP/1.1\r\n\r\n";
        let request = Request::parse_header(raw).unwrap();

        assert_eq!(request.path(), "/estado");
        assert_eq!(request.query_param("full"), Some("true"));
        assert_eq!(request.query_param("modo"), Some("rapido"));
        assert_eq!(request.query_param("missing"), None);
    }

    #[test]
    fn test_headers_case_insensitive() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost:8080\r\nCONTENT-Length: 5\r\n\r\n";
        let request = Request::parse_header(raw).unwrap();

        assert_eq!(request.header("host"), Some("localhost:8080"));
        assert_eq!(request.header("Host"), Some("localhost:8080"));
        assert_eq!(request.content_length(), Some(5));
    }

    #[test]
    fn test_all_methods() {
        for (raw, method) in [
            (&b"GET / HTTP/1.1\r\n\r\n"[..], Method::GET),
            (&b"HEAD / HTTP/1.1\r\n\r\n"[..], Method::HEAD),
            (&b"POST / HTTP/1.1\r\n\r\n"[..], Method::POST),
            (&b"PUT / HTTP/1.1\r\n\r\n"[..], Method::PUT),
            (&b"PATCH / HTTP/1.1\r\n\r\n"[..], Method::PATCH),
            (&b"DELETE / HTTP/1.1\r\n\r\n"[..], Method::DELETE),
            (&b"OPTIONS / HTTP/1.1\r\n\r\n"[..], Method::OPTIONS),
        ] {
            assert_eq!(Request::parse_header(raw).unwrap().method(), method);
        }
    }

    #[test]
    fn test_invalid_method() {
        let raw = b"BREW /cafe HTTP/1.1\r\n\r\n";
        let result = Request::parse_header(raw);

        assert!(matches!(result, Err(ParseError::UnsupportedMethod(_))));
    }

    #[test]
    fn test_invalid_version() {
        let raw = b"GET / HTTP/2.0\r\n\r\n";
        let result = Request::parse_header(raw);

        assert!(matches!(result, Err(ParseError::InvalidHttpVersion(_))));
    }

    #[test]
    fn test_uri_too_long() {
        let long_path = format!("/{}", "a".repeat(MAX_URL_LENGTH + 1));
        let raw = format!("GET {} HTTP/1.1\r\n\r\n", long_path);
        let result = Request::parse_header(raw.as_bytes());

        assert!(matches!(result, Err(ParseError::UriTooLong(_))));
    }

    #[test]
    fn test_negative_content_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: -5\r\n\r\n";
        let result = Request::parse_header(raw);

        assert!(matches!(result, Err(ParseError::InvalidContentLength(_))));
    }

    #[test]
    fn test_non_numeric_content_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: mucho\r\n\r\n";
        let result = Request::parse_header(raw);

        assert!(matches!(result, Err(ParseError::InvalidContentLength(_))));
    }

    #[test]
    fn test_invalid_request_line() {
        let raw = b"GET\r\n\r\n"; // Falta path y version
        let result = Request::parse_header(raw);

        assert!(matches!(result, Err(ParseError::InvalidRequestLine)));
    }

    // ==================== Keep-alive ====================

    #[test]
    fn test_keep_alive_http10_default_close() {
        let raw = b"GET / HTTP/1.0\r\n\r\n";
        let request = Request::parse_header(raw).unwrap();
        assert!(request.requests_close());
    }

    #[test]
    fn test_keep_alive_http11_default_open() {
        let raw = b"GET / HTTP/1.1\r\n\r\n";
        let request = Request::parse_header(raw).unwrap();
        assert!(!request.requests_close());
    }

    #[test]
    fn test_keep_alive_explicit_close() {
        let raw = b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n";
        let request = Request::parse_header(raw).unwrap();
        assert!(request.requests_close());
    }

    #[test]
    fn test_keep_alive_http10_explicit_keep_alive() {
        let raw = b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n";
        let request = Request::parse_header(raw).unwrap();
        assert!(!request.requests_close());
    }

    // ==================== Headers especiales ====================

    #[test]
    fn test_expects_continue() {
        let raw = b"POST / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 3\r\n\r\n";
        let request = Request::parse_header(raw).unwrap();
        assert!(request.expects_continue());
    }

    #[test]
    fn test_async_mode() {
        let raw = b"POST / HTTP/1.1\r\nx-arango-async: true\r\n\r\n";
        assert_eq!(
            Request::parse_header(raw).unwrap().async_mode(),
            Some(AsyncMode::Fire)
        );

        let raw = b"POST / HTTP/1.1\r\nX-Arango-Async: store\r\n\r\n";
        assert_eq!(
            Request::parse_header(raw).unwrap().async_mode(),
            Some(AsyncMode::Store)
        );

        let raw = b"POST / HTTP/1.1\r\n\r\n";
        assert_eq!(Request::parse_header(raw).unwrap().async_mode(), None);
    }

    #[test]
    fn test_accepts_gzip() {
        let raw = b"GET / HTTP/1.1\r\nAccept-Encoding: gzip, deflate\r\n\r\n";
        assert!(Request::parse_header(raw).unwrap().accepts_gzip());

        let raw = b"GET / HTTP/1.1\r\nAccept-Encoding: br\r\n\r\n";
        assert!(!Request::parse_header(raw).unwrap().accepts_gzip());
    }

    #[test]
    fn test_origin_recorded() {
        let raw = b"OPTIONS / HTTP/1.1\r\nOrigin: http://example.com\r\nAccess-Control-Request-Headers: X-Custom\r\n\r\n";
        let request = Request::parse_header(raw).unwrap();
        assert_eq!(request.origin(), Some("http://example.com"));
        assert_eq!(
            request.access_control_request_headers(),
            Some("X-Custom")
        );
    }

    #[test]
    fn test_allows_body() {
        assert!(Method::POST.allows_body());
        assert!(Method::PUT.allows_body());
        assert!(Method::PATCH.allows_body());
        assert!(Method::DELETE.allows_body());
        assert!(Method::OPTIONS.allows_body());
        assert!(!Method::GET.allows_body());
        assert!(!Method::HEAD.allows_body());
    }
}
