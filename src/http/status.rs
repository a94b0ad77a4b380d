//! # Códigos de Estado HTTP
//! src/http/status.rs
//!
//! Define los códigos de estado que el núcleo del servidor produce
//! directamente (sin pasar por handlers de aplicación):
//!
//! - **1xx**: 100 Continue (respuesta interina a `Expect: 100-continue`)
//! - **2xx**: 200/202/204 (preflight CORS, submission async, sin contenido)
//! - **4xx**: errores de protocolo y de autenticación
//! - **5xx**: errores internos, backpressure y versión no soportada

/// Representa los códigos de estado HTTP que produce el servidor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 100 Continue - Respuesta interina antes de recibir el body
    Continue = 100,

    /// 200 OK - La petición fue exitosa
    Ok = 200,

    /// 202 Accepted - Job async encolado, se responde sin esperar al handler
    Accepted = 202,

    /// 204 No Content - Petición exitosa sin contenido en el body
    NoContent = 204,

    /// 400 Bad Request - Request line o header malformado
    BadRequest = 400,

    /// 401 Unauthorized - El autenticador rechazó las credenciales
    Unauthorized = 401,

    /// 403 Forbidden - Autenticado pero sin permiso (ej: debe cambiar password)
    Forbidden = 403,

    /// 404 Not Found - Contexto o base desconocida según el autenticador
    NotFound = 404,

    /// 405 Method Not Allowed - Método no reconocido (cierre forzado)
    MethodNotAllowed = 405,

    /// 411 Length Required - Content-Length negativo o ilegible
    LengthRequired = 411,

    /// 413 Payload Too Large - Body declarado excede el máximo configurado
    PayloadTooLarge = 413,

    /// 414 URI Too Long - URL sobre el techo fijo
    UriTooLong = 414,

    /// 431 Request Header Fields Too Large - Header sin terminador dentro del límite
    HeaderFieldsTooLarge = 431,

    /// 500 Internal Server Error - Error interno del servidor
    InternalServerError = 500,

    /// 503 Service Unavailable - Cola del dispatcher llena (backpressure)
    ServiceUnavailable = 503,

    /// 505 HTTP Version Not Supported - Versión distinta de 1.0/1.1
    HttpVersionNotSupported = 505,
}

impl StatusCode {
    /// Convierte el código a su valor numérico
    ///
    /// # Ejemplo
    /// ```
    /// use redunix_httpd::http::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// ```
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Retorna el texto de razón (reason phrase) asociado al código
    ///
    /// # Ejemplo
    /// ```
    /// use redunix_httpd::http::StatusCode;
    /// assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::HeaderFieldsTooLarge.reason_phrase(), "Request Header Fields Too Large");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Continue => "Continue",
            StatusCode::Ok => "OK",
            StatusCode::Accepted => "Accepted",
            StatusCode::NoContent => "No Content",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::LengthRequired => "Length Required",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::UriTooLong => "URI Too Long",
            StatusCode::HeaderFieldsTooLarge => "Request Header Fields Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::ServiceUnavailable => "Service Unavailable",
            StatusCode::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// Verifica si el código indica éxito (2xx)
    pub fn is_success(&self) -> bool {
        let code = self.as_u16();
        (200..300).contains(&code)
    }

    /// Verifica si el código indica error del cliente (4xx)
    pub fn is_client_error(&self) -> bool {
        let code = self.as_u16();
        (400..500).contains(&code)
    }

    /// Verifica si el código indica error del servidor (5xx)
    pub fn is_server_error(&self) -> bool {
        let code = self.as_u16();
        (500..600).contains(&code)
    }

    /// Verifica si el código permite body en la respuesta
    ///
    /// Las respuestas interinas (1xx) y 204 nunca llevan body.
    pub fn allows_body(&self) -> bool {
        !matches!(self, StatusCode::Continue | StatusCode::NoContent)
    }
}

impl std::fmt::Display for StatusCode {
    /// Formatea el código de estado para mostrarlo
    ///
    /// Formato: "200 OK"
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_values() {
        assert_eq!(StatusCode::Continue.as_u16(), 100);
        assert_eq!(StatusCode::Ok.as_u16(), 200);
        assert_eq!(StatusCode::Accepted.as_u16(), 202);
        assert_eq!(StatusCode::MethodNotAllowed.as_u16(), 405);
        assert_eq!(StatusCode::HeaderFieldsTooLarge.as_u16(), 431);
        assert_eq!(StatusCode::HttpVersionNotSupported.as_u16(), 505);
    }

    #[test]
    fn test_reason_phrases() {
        assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
        assert_eq!(StatusCode::LengthRequired.reason_phrase(), "Length Required");
        assert_eq!(StatusCode::ServiceUnavailable.reason_phrase(), "Service Unavailable");
    }

    #[test]
    fn test_is_success() {
        assert!(StatusCode::Ok.is_success());
        assert!(StatusCode::Accepted.is_success());
        assert!(!StatusCode::BadRequest.is_success());
        assert!(!StatusCode::InternalServerError.is_success());
    }

    #[test]
    fn test_is_client_error() {
        assert!(StatusCode::UriTooLong.is_client_error());
        assert!(StatusCode::PayloadTooLarge.is_client_error());
        assert!(!StatusCode::Ok.is_client_error());
        assert!(!StatusCode::HttpVersionNotSupported.is_client_error());
    }

    #[test]
    fn test_is_server_error() {
        assert!(StatusCode::InternalServerError.is_server_error());
        assert!(StatusCode::HttpVersionNotSupported.is_server_error());
        assert!(!StatusCode::Forbidden.is_server_error());
    }

    #[test]
    fn test_allows_body() {
        assert!(StatusCode::Ok.allows_body());
        assert!(!StatusCode::Continue.allows_body());
        assert!(!StatusCode::NoContent.allows_body());
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusCode::Ok.to_string(), "200 OK");
        assert_eq!(StatusCode::Accepted.to_string(), "202 Accepted");
        assert_eq!(
            StatusCode::HeaderFieldsTooLarge.to_string(),
            "431 Request Header Fields Too Large"
        );
    }
}
