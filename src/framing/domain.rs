//! Ensamblador de tramas por conexión.
//!
//! Acumula los bytes que llegan del socket y extrae mensajes de aplicación
//! completos según la política de framing del despliegue. El buffer persiste
//! entre llamadas a `feed`, por lo que un delimitador partido entre dos
//! chunks de red se detecta igualmente.


use bytes::{Bytes, BytesMut};
use thiserror::Error;


/// Política de extracción de mensajes del stream entrante.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingPolicy {
    /// El dispositivo envía exactamente un mensaje por conexión; el stream
    /// se considera completo recién cuando el par cierra su extremo.
    UntilDisconnect,
    /// Una secuencia delimitadora separa mensajes dentro de una conexión
    /// de larga vida. Los segmentos vacíos entre delimitadores consecutivos
    /// se descartan en silencio.
    Delimited(Vec<u8>),
}


#[derive(Debug, Error)]
pub enum FramingError {
    #[error("buffered message exceeds the {limit} byte limit")]
    BufferOverflow { limit: usize },
}


/// Acumulador de bytes de una conexión. No es reutilizable tras el cierre.
#[derive(Debug)]
pub struct FrameAssembler {
    policy: FramingPolicy,
    buffer: BytesMut,
    max_buffered: usize,
}


impl FrameAssembler {

    pub fn new(policy: FramingPolicy, max_buffered: usize) -> Self {
        Self {
            policy,
            buffer: BytesMut::new(),
            max_buffered,
        }
    }

    /// Incorpora un chunk del socket y devuelve las tramas completas que
    /// quedaron disponibles (ninguna en modo `UntilDisconnect`).
    ///
    /// # Errores
    /// * `BufferOverflow`: el mensaje acumulado superó el máximo configurado;
    ///   la conexión debe fallarse en lugar de crecer sin límite.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, FramingError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        if let FramingPolicy::Delimited(delimiter) = &self.policy {
            while let Some(at) = find_delimiter(&self.buffer, delimiter) {
                let segment = self.buffer.split_to(at).freeze();
                let _ = self.buffer.split_to(delimiter.len());
                if !segment.is_empty() {
                    frames.push(segment);
                }
            }
        }

        if self.buffer.len() > self.max_buffered {
            return Err(FramingError::BufferOverflow { limit: self.max_buffered });
        }

        Ok(frames)
    }

    /// Consume el resto del buffer al fin de stream.
    ///
    /// En modo `UntilDisconnect` esto entrega el único mensaje de la conexión.
    /// En modo delimitado entrega el remanente final de un dispositivo que
    /// cerró sin enviar el último delimitador. Un buffer terminal vacío
    /// devuelve `None` y queda en manos del llamador registrarlo.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.buffer.split().freeze())
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}


fn find_delimiter(buffer: &[u8], delimiter: &[u8]) -> Option<usize> {
    if delimiter.is_empty() || buffer.len() < delimiter.len() {
        return None;
    }
    buffer.windows(delimiter.len()).position(|window| window == delimiter)
}
