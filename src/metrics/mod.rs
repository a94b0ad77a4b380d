//! # Módulo de Métricas
//!
//! Estadísticas agregadas del servidor: requests por status, latencias,
//! conexiones y estado del dispatcher.

pub mod collector;

pub use collector::MetricsCollector;
