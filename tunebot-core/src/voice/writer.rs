// File: src/voice/writer.rs

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::Error;
use crate::pipeline::{AudioStream, PlaybackEvent, PlaybackEventKind};
use crate::voice::VoiceSink;

/// 20 ms of 48 kHz stereo s16le.
const FRAME_BYTES: usize = 3840;

/// VoiceSink that copies PCM frames into any `AsyncWrite` output, scaling
/// samples by the current gain on the way through. A new `play` supersedes
/// the previous stream task; pause gates the copy loop between frames.
pub struct PcmWriterSink<W> {
    writer: Arc<Mutex<W>>,
    gain: watch::Sender<f32>,
    paused: watch::Sender<bool>,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl<W: AsyncWrite + Send + Unpin + 'static> PcmWriterSink<W> {
    pub fn new(writer: W) -> Self {
        let (gain, _) = watch::channel(0.5f32);
        let (paused, _) = watch::channel(false);
        Self {
            writer: Arc::new(Mutex::new(writer)),
            gain,
            paused,
            current: Mutex::new(None),
        }
    }

    pub fn gain(&self) -> f32 {
        *self.gain.borrow()
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin + 'static> VoiceSink for PcmWriterSink<W> {
    async fn play(
        &self,
        audio: AudioStream,
        generation: u64,
        gain: f32,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<(), Error> {
        let _ = self.gain.send(gain);
        let _ = self.paused.send(false);

        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            previous.abort();
        }

        let writer = self.writer.clone();
        let gain_rx = self.gain.subscribe();
        let paused_rx = self.paused.subscribe();
        *current = Some(tokio::spawn(stream_pcm(
            audio, writer, gain_rx, paused_rx, generation, events,
        )));
        Ok(())
    }

    async fn set_gain(&self, gain: f32) {
        let _ = self.gain.send(gain.clamp(0.0, 1.0));
    }

    async fn pause(&self) {
        let _ = self.paused.send(true);
    }

    async fn resume(&self) {
        let _ = self.paused.send(false);
    }

    async fn stop(&self) {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            previous.abort();
        }
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.stop().await;
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        Ok(())
    }
}

async fn stream_pcm<W: AsyncWrite + Send + Unpin>(
    mut audio: AudioStream,
    writer: Arc<Mutex<W>>,
    gain_rx: watch::Receiver<f32>,
    mut paused_rx: watch::Receiver<bool>,
    generation: u64,
    events: mpsc::UnboundedSender<PlaybackEvent>,
) {
    let mut buf = vec![0u8; FRAME_BYTES];
    let mut started = false;

    loop {
        if *paused_rx.borrow() {
            if paused_rx.changed().await.is_err() {
                return;
            }
            continue;
        }

        match audio.read(&mut buf).await {
            Ok(0) => {
                debug!("audio stream ended (generation {generation})");
                let _ = events.send(PlaybackEvent {
                    generation,
                    kind: PlaybackEventKind::Finished,
                });
                return;
            }
            Ok(n) => {
                if !started {
                    started = true;
                    let _ = events.send(PlaybackEvent {
                        generation,
                        kind: PlaybackEventKind::Started,
                    });
                }
                apply_gain(&mut buf[..n], *gain_rx.borrow());
                if let Err(e) = writer.lock().await.write_all(&buf[..n]).await {
                    let _ = events.send(PlaybackEvent {
                        generation,
                        kind: PlaybackEventKind::Failed(format!("voice output error: {e}")),
                    });
                    return;
                }
            }
            Err(e) => {
                let _ = events.send(PlaybackEvent {
                    generation,
                    kind: PlaybackEventKind::Failed(format!("audio read error: {e}")),
                });
                return;
            }
        }
    }
}

/// Scale s16le samples in place. A trailing odd byte is left untouched.
pub(crate) fn apply_gain(samples: &mut [u8], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for pair in samples.chunks_exact_mut(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        let scaled = (sample as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        pair.copy_from_slice(&scaled.to_le_bytes());
    }
}
