//! # Autenticación
//! src/auth.rs
//!
//! Seam de autenticación consultado por la comm task antes de despachar
//! un job. El resultado se traduce directamente a un status:
//!
//! - `Granted`: el request sigue hacia el handler
//! - `Unauthorized`: 401 con header `WWW-Authenticate`
//! - `Forbidden`: 403 (autenticado pero sin permiso)
//! - `NotFound`: 404 (contexto o base desconocida)
//!
//! Los requests `OPTIONS` (preflight CORS) nunca pasan por acá.

use crate::http::Request;

/// Veredicto del autenticador sobre un request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Granted,
    Unauthorized,
    Forbidden,
    NotFound,
}

/// Decide si un request puede alcanzar su handler
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, request: &Request) -> AuthResult;

    /// Realm para el header `WWW-Authenticate` de los 401
    fn realm(&self) -> &str {
        "redunix"
    }
}

/// Autenticador permisivo por defecto: todo request pasa
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, _request: &Request) -> AuthResult {
        AuthResult::Granted
    }
}
