// File: src/pipeline/mod.rs
//
// The Transcode Pipeline turns a stream address plus a start offset into raw
// PCM (s16le, 48 kHz, stereo). It is a restartable, killable external
// process; every spawn carries a generation number so the session can discard
// signals from a pipeline it has already superseded.

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};

use crate::Error;

pub mod ffmpeg;

pub use ffmpeg::FfmpegPipelineFactory;

/// Raw decoded audio byte stream.
pub type AudioStream = Box<dyn AsyncRead + Send + Unpin>;

/// Generation-tagged signal from a pipeline monitor or the voice sink.
#[derive(Debug, Clone)]
pub struct PlaybackEvent {
    pub generation: u64,
    pub kind: PlaybackEventKind,
}

#[derive(Debug, Clone)]
pub enum PlaybackEventKind {
    /// First audio arrived.
    Started,
    /// The stream ended normally.
    Finished,
    /// The transcoder or the output died mid-stream.
    Failed(String),
}

/// Kill handle for a spawned pipeline. Dropping it also kills the process.
pub struct PipelineControl {
    kill_tx: Option<oneshot::Sender<()>>,
}

impl PipelineControl {
    pub fn new(kill_tx: oneshot::Sender<()>) -> Self {
        Self {
            kill_tx: Some(kill_tx),
        }
    }

    pub fn kill(mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// A running transcode pipeline: its PCM output plus the kill handle.
pub struct ActivePipeline {
    pub generation: u64,
    pub audio: AudioStream,
    pub control: PipelineControl,
}

#[async_trait]
pub trait PipelineFactory: Send + Sync {
    /// Spawn a pipeline decoding `stream_address` starting `offset_secs` in.
    /// Abnormal termination is reported on `events` tagged with `generation`.
    async fn spawn(
        &self,
        stream_address: &str,
        offset_secs: f64,
        generation: u64,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<ActivePipeline, Error>;
}
