//! Binary-data dispatcher.
//!
//! BINARY envelopes carry type-tagged raw bytes (audio, files, camera
//! frames). The listener routes them to a pluggable [`BinaryDataHandler`];
//! every operation defaults to log-and-discard so a broker without binary
//! domain handlers still runs.

use tracing::warn;

use crate::connection::ClientConnection;

/// Default sample rate when the metadata does not carry one.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Default sample width when the metadata does not carry one.
pub const DEFAULT_SAMPLE_WIDTH: u32 = 2;

/// Consumer of type-tagged raw-byte payloads.
#[allow(unused_variables)]
pub trait BinaryDataHandler: Send + Sync {
    /// Raw microphone audio.
    fn microphone(
        &self,
        data: &[u8],
        sample_rate: u32,
        sample_width: u32,
        conn: &ClientConnection,
    ) {
        warn!(bytes = data.len(), sample_rate, "ignoring binary audio input");
    }

    /// Audio to transcribe; the transcription goes back to the sender.
    fn stt_transcribe(
        &self,
        data: &[u8],
        sample_rate: u32,
        sample_width: u32,
        lang: Option<&str>,
        conn: &ClientConnection,
    ) {
        warn!(bytes = data.len(), "ignoring binary STT transcribe request");
    }

    /// Audio to transcribe and handle as an utterance.
    fn stt_handle(
        &self,
        data: &[u8],
        sample_rate: u32,
        sample_width: u32,
        lang: Option<&str>,
        conn: &ClientConnection,
    ) {
        warn!(bytes = data.len(), "ignoring binary STT handle request");
    }

    /// Synthesized speech audio coming back from a peer.
    fn receive_tts(
        &self,
        data: &[u8],
        utterance: Option<&str>,
        lang: Option<&str>,
        file_name: Option<&str>,
        conn: &ClientConnection,
    ) {
        warn!(bytes = data.len(), ?utterance, "ignoring binary TTS audio");
    }

    /// An arbitrary file.
    fn receive_file(&self, data: &[u8], file_name: Option<&str>, conn: &ClientConnection) {
        warn!(bytes = data.len(), ?file_name, "ignoring binary file");
    }

    /// A camera frame.
    fn image(&self, data: &[u8], camera_id: Option<&str>, conn: &ClientConnection) {
        warn!(bytes = data.len(), ?camera_id, "ignoring binary image");
    }
}

/// The do-nothing handler: logs and discards everything.
pub struct DefaultBinaryHandler;

impl BinaryDataHandler for DefaultBinaryHandler {}
