//! # Collector de Métricas
//! src/metrics/collector.rs
//!
//! Recolecta y agrega métricas del servidor en tiempo real: requests
//! por status code, percentiles de latencia, conexiones activas y un
//! snapshot de la cola del dispatcher.

use crate::dispatcher::QueueCounters;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Máximo de latencias guardadas para percentiles
const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Collector de métricas thread-safe
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsData>>,
    start_time: Instant,
}

/// Datos internos de métricas
struct MetricsData {
    /// Contador total de requests
    total_requests: u64,

    /// Requests por código de estado
    status_codes: HashMap<u16, u64>,

    /// Latencias registradas (en microsegundos)
    latencies: Vec<u64>,

    /// Conexiones abiertas actualmente
    active_connections: u64,

    /// Conexiones aceptadas desde el arranque
    total_connections: u64,
}

impl MetricsCollector {
    /// Crea un nuevo collector de métricas
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsData {
                total_requests: 0,
                status_codes: HashMap::new(),
                latencies: Vec::with_capacity(MAX_LATENCY_SAMPLES),
                active_connections: 0,
                total_connections: 0,
            })),
            start_time: Instant::now(),
        }
    }

    fn lock_data(&self) -> MutexGuard<'_, MetricsData> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registra un request completado
    pub fn record_request(&self, status_code: u16, latency: Duration) {
        let mut data = self.lock_data();

        data.total_requests += 1;
        *data.status_codes.entry(status_code).or_insert(0) += 1;

        // Ventana deslizante de latencias para los percentiles
        if data.latencies.len() >= MAX_LATENCY_SAMPLES {
            data.latencies.remove(0);
        }
        let latency_us = latency.as_micros() as u64;
        data.latencies.push(latency_us);
    }

    /// Registra una conexión aceptada
    pub fn connection_opened(&self) {
        let mut data = self.lock_data();
        data.active_connections += 1;
        data.total_connections += 1;
    }

    /// Registra el cierre de una conexión
    pub fn connection_closed(&self) {
        let mut data = self.lock_data();
        data.active_connections = data.active_connections.saturating_sub(1);
    }

    /// Conexiones abiertas en este momento
    pub fn active_connections(&self) -> u64 {
        self.lock_data().active_connections
    }

    /// Total de requests registrados
    pub fn total_requests(&self) -> u64 {
        self.lock_data().total_requests
    }

    /// Requests registrados con un status específico
    pub fn requests_with_status(&self, status_code: u16) -> u64 {
        self.lock_data()
            .status_codes
            .get(&status_code)
            .copied()
            .unwrap_or(0)
    }

    /// Obtiene las métricas actuales en formato JSON
    ///
    /// `queue` es el snapshot de contadores del dispatcher al momento
    /// de la consulta.
    pub fn to_json(&self, queue: QueueCounters) -> String {
        let data = self.lock_data();

        let uptime_secs = self.start_time.elapsed().as_secs();
        let (p50, p95, p99, avg) = percentiles(&data.latencies);

        let status_codes: serde_json::Map<String, serde_json::Value> = data
            .status_codes
            .iter()
            .map(|(code, count)| (code.to_string(), serde_json::Value::from(*count)))
            .collect();

        serde_json::json!({
            "server": {
                "uptime_seconds": uptime_secs,
            },
            "connections": {
                "active": data.active_connections,
                "total": data.total_connections,
            },
            "requests": {
                "total": data.total_requests,
                "status_codes": status_codes,
            },
            "latency_us": {
                "p50": p50,
                "p95": p95,
                "p99": p99,
                "avg": avg,
                "samples": data.latencies.len(),
            },
            "dispatcher": {
                "running": queue.running,
                "waiting": queue.waiting,
                "blocked": queue.blocked,
                "special": queue.special,
                "started": queue.started,
                "queued": queue.queued,
            },
        })
        .to_string()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Calcula percentiles de latencia (p50, p95, p99, promedio)
fn percentiles(latencies: &[u64]) -> (u64, u64, u64, u64) {
    if latencies.is_empty() {
        return (0, 0, 0, 0);
    }

    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();

    let len = sorted.len();
    let p50 = sorted[len * 50 / 100];
    let p95 = sorted[(len * 95 / 100).min(len - 1)];
    let p99 = sorted[(len * 99 / 100).min(len - 1)];

    let sum: u64 = sorted.iter().sum();
    let avg = sum / len as u64;

    (p50, p95, p99, avg)
}
