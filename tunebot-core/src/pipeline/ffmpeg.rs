// File: src/pipeline/ffmpeg.rs

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::Error;
use crate::pipeline::{
    ActivePipeline, PipelineControl, PipelineFactory, PlaybackEvent, PlaybackEventKind,
};

/// Spawns `ffmpeg` with reconnect flags and an optional `-ss` start offset,
/// decoding to s16le 48 kHz stereo on stdout.
pub struct FfmpegPipelineFactory {
    binary: String,
}

impl FfmpegPipelineFactory {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl PipelineFactory for FfmpegPipelineFactory {
    async fn spawn(
        &self,
        stream_address: &str,
        offset_secs: f64,
        generation: u64,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<ActivePipeline, Error> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-reconnect")
            .arg("1")
            .arg("-reconnect_streamed")
            .arg("1")
            .arg("-reconnect_delay_max")
            .arg("5");
        if offset_secs > 0.0 {
            cmd.arg("-ss").arg(format!("{offset_secs:.3}"));
        }
        cmd.arg("-i")
            .arg(stream_address)
            .arg("-f")
            .arg("s16le")
            .arg("-ar")
            .arg("48000")
            .arg("-ac")
            .arg("2")
            .arg("-loglevel")
            .arg("warning")
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        debug!(
            "spawning {} (generation {generation}, offset {offset_secs:.1}s)",
            self.binary
        );
        let mut child = cmd.spawn().map_err(|e| {
            Error::PipelineRuntimeError(format!("failed to spawn {}: {e}", self.binary))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::PipelineRuntimeError("pipeline stdout unavailable".into()))?;

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(monitor(child, kill_rx, generation, events));

        Ok(ActivePipeline {
            generation,
            audio: Box::new(stdout),
            control: PipelineControl::new(kill_tx),
        })
    }
}

/// Waits for the transcoder to exit, or kills it when asked to. Abnormal exit
/// becomes a `Failed` event; EOF detection is the sink's job. There is no
/// acknowledgment protocol for kills: the session has already moved on.
async fn monitor(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    generation: u64,
    events: mpsc::UnboundedSender<PlaybackEvent>,
) {
    tokio::select! {
        _ = kill_rx => {
            debug!("killing transcoder (generation {generation})");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        status = child.wait() => match status {
            Ok(s) if s.success() => {
                debug!("transcoder exited cleanly (generation {generation})");
            }
            Ok(s) => {
                warn!("transcoder exited abnormally (generation {generation}): {s}");
                let _ = events.send(PlaybackEvent {
                    generation,
                    kind: PlaybackEventKind::Failed(format!("transcoder exited with {s}")),
                });
            }
            Err(e) => {
                warn!("transcoder wait error (generation {generation}): {e}");
                let _ = events.send(PlaybackEvent {
                    generation,
                    kind: PlaybackEventKind::Failed(e.to_string()),
                });
            }
        },
    }
}
