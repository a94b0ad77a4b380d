//! # Buffers de Conexión
//! src/server/buffer.rs
//!
//! Buffers que median entre el socket no-bloqueante y el parser:
//!
//! - [`ReadBuffer`]: acumula bytes entrantes y mantiene los cursores de
//!   parsing (inicio del request actual, inicio del body, posición de
//!   escaneo del terminador de headers). Los datos ya consumidos se
//!   retienen hasta que una compactación los descarta, de modo que los
//!   cursores solo avanzan.
//! - [`WriteQueue`]: cola FIFO de respuestas serializadas, con a lo sumo
//!   un buffer parcialmente escrito (el del frente).
//!
//! Ambos están pensados para sockets en modo no-bloqueante: las
//! operaciones distinguen "hubo progreso", "no hay más por ahora"
//! (WouldBlock) y "el peer cerró".

use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Tamaño de los chunks de lectura del socket
const READ_CHUNK_SIZE: usize = 4096;

/// Resultado de intentar llenar el buffer de lectura
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Se leyeron uno o más bytes
    Progress,
    /// El socket no tiene datos disponibles (no se leyó nada)
    WouldBlock,
    /// El peer cerró la conexión (EOF)
    Closed,
}

/// Resultado de drenar la cola de escritura hacia el socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Todos los buffers pendientes se escribieron por completo
    Drained,
    /// Quedan bytes pendientes (el socket devolvió WouldBlock)
    Pending,
}

/// Buffer de lectura con cursores de parsing
///
/// Invariantes:
/// - `read_position <= body_position <= data.len()`
/// - `scan_position >= read_position` (nunca se re-escanea lo ya visto)
#[derive(Debug)]
pub struct ReadBuffer {
    /// Bytes acumulados desde el socket
    data: Vec<u8>,

    /// Inicio del request en curso (los bytes anteriores ya fueron consumidos)
    read_position: usize,

    /// Inicio del body del request en curso (tras el `\r\n\r\n`)
    body_position: usize,

    /// Próximo índice desde el cual buscar el terminador de headers
    scan_position: usize,

    /// Requests completados desde la última compactación
    requests_since_compaction: usize,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            read_position: 0,
            body_position: 0,
            scan_position: 0,
            requests_since_compaction: 0,
        }
    }

    /// Lee del socket hasta agotar los datos disponibles
    ///
    /// Drena en chunks hasta recibir WouldBlock (requisito de los
    /// reactors edge-triggered). EINTR se reintenta. Si se observa EOF
    /// se reporta [`FillOutcome::Closed`] aunque antes hubiera progreso:
    /// el caller procesa lo acumulado y luego cierra.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> io::Result<FillOutcome> {
        let mut progress = false;
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            match reader.read(&mut chunk) {
                Ok(0) => return Ok(FillOutcome::Closed),
                Ok(n) => {
                    self.data.extend_from_slice(&chunk[..n]);
                    progress = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(if progress {
                        FillOutcome::Progress
                    } else {
                        FillOutcome::WouldBlock
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Agrega bytes ya leídos (camino TLS: plaintext descifrado)
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Busca el terminador de headers `\r\n\r\n` desde el cursor de escaneo
    ///
    /// Retorna el índice absoluto del primer byte del body si el
    /// terminador está completo. El cursor de escaneo avanza aunque no
    /// se encuentre, retrocediendo 3 bytes para cubrir terminadores
    /// partidos entre chunks.
    pub fn find_header_end(&mut self) -> Option<usize> {
        let start = self.scan_position.max(self.read_position);
        let data = &self.data;

        if data.len() >= 4 && start <= data.len() {
            for i in start..data.len().saturating_sub(3) {
                if &data[i..i + 4] == b"\r\n\r\n" {
                    self.scan_position = i + 4;
                    return Some(i + 4);
                }
            }
        }

        // Los últimos 3 bytes podrían ser el prefijo del terminador
        self.scan_position = self
            .data
            .len()
            .saturating_sub(3)
            .max(self.read_position);
        None
    }

    /// Fija el inicio del body del request en curso
    pub fn set_body_position(&mut self, pos: usize) {
        debug_assert!(pos >= self.read_position && pos <= self.data.len());
        self.body_position = pos;
    }

    /// Bytes del header block del request en curso
    pub fn header_block(&self) -> &[u8] {
        &self.data[self.read_position..self.body_position]
    }

    /// Bytes de body disponibles hasta ahora para el request en curso
    pub fn body_available(&self) -> usize {
        self.data.len() - self.body_position
    }

    /// Extrae los primeros `length` bytes de body del request en curso
    ///
    /// Solo debe llamarse cuando `body_available() >= length`.
    pub fn take_body(&mut self, length: usize) -> Vec<u8> {
        debug_assert!(self.body_available() >= length);
        self.data[self.body_position..self.body_position + length].to_vec()
    }

    /// Consume el request en curso (headers + `body_length` bytes de body)
    ///
    /// Los cursores avanzan al inicio del siguiente request pipelined.
    pub fn consume_request(&mut self, body_length: usize) {
        let next = self.body_position + body_length;
        debug_assert!(next <= self.data.len());
        self.read_position = next;
        self.body_position = next;
        self.scan_position = self.scan_position.max(next);
        self.requests_since_compaction += 1;
    }

    /// Bytes pendientes de procesar (requests pipelined aún no parseados)
    pub fn unconsumed(&self) -> usize {
        self.data.len() - self.read_position
    }

    /// Tamaño del header block parcial acumulado (para el límite de 431)
    pub fn header_bytes_pending(&self) -> usize {
        self.data.len() - self.read_position
    }

    /// Decide si corresponde compactar según los umbrales configurados
    pub fn should_compact(&self, max_buffered: usize, max_requests: usize) -> bool {
        self.read_position > 0
            && (self.data.len() > max_buffered
                || self.requests_since_compaction >= max_requests)
    }

    /// Descarta los bytes ya consumidos desplazando los cursores
    ///
    /// Retorna el desplazamiento aplicado.
    pub fn compact(&mut self) -> usize {
        let shift = self.read_position;
        if shift == 0 {
            return 0;
        }
        self.data.drain(..shift);
        self.read_position = 0;
        self.body_position -= shift;
        self.scan_position -= shift;
        self.requests_since_compaction = 0;
        shift
    }

    /// Tamaño total del buffer (incluye bytes ya consumidos sin compactar)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Cola FIFO de buffers de salida con escritura parcial
#[derive(Debug, Default)]
pub struct WriteQueue {
    /// Buffers serializados pendientes de envío
    buffers: VecDeque<Vec<u8>>,

    /// Offset dentro del buffer del frente (único parcialmente escrito)
    write_offset: usize,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self {
            buffers: VecDeque::new(),
            write_offset: 0,
        }
    }

    /// Encola un buffer serializado para su envío
    pub fn push(&mut self, bytes: Vec<u8>) {
        if !bytes.is_empty() {
            self.buffers.push_back(bytes);
        }
    }

    /// Escribe hacia el socket hasta drenar la cola o recibir WouldBlock
    pub fn flush_to<W: Write>(&mut self, writer: &mut W) -> io::Result<FlushOutcome> {
        while let Some(front) = self.buffers.front() {
            match writer.write(&front[self.write_offset..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "el socket no aceptó bytes",
                    ));
                }
                Ok(n) => {
                    self.write_offset += n;
                    if self.write_offset == front.len() {
                        self.buffers.pop_front();
                        self.write_offset = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FlushOutcome::Pending);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(FlushOutcome::Drained)
    }

    /// Indica si no quedan bytes pendientes
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Bytes totales pendientes de envío
    pub fn pending_bytes(&self) -> usize {
        let total: usize = self.buffers.iter().map(|b| b.len()).sum();
        total - self.write_offset
    }
}
