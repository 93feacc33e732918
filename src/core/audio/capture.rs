//! The capture-device seam.
//!
//! A [`CaptureDevice`] turns a platform capture callback into chunk pushes
//! on a [`ChunkSink`]. The built-in [`MicrophoneDevice`] (behind the
//! `microphone` feature) captures from the system input device via cpal and
//! converts samples to 16-bit little-endian PCM.

use async_trait::async_trait;

use super::source::ChunkSink;
use crate::errors::TranscribeResult;

/// A continuous audio capture device.
///
/// `start` begins pushing chunks into the sink and returns once capture is
/// running; production continues until `stop` or a hard device failure. On a
/// hard failure the device drops its sink, which ends the chunk queue and
/// lets the session wind down gracefully with the results received so far.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Stable identifier for exclusive-ownership accounting. Two devices
    /// with the same id cannot be captured concurrently.
    fn id(&self) -> String;

    /// Begin producing chunks into `sink`.
    async fn start(&mut self, sink: ChunkSink) -> TranscribeResult<()>;

    /// Halt production and release the underlying device. Idempotent.
    async fn stop(&mut self);
}

#[cfg(feature = "microphone")]
pub use mic::MicrophoneDevice;

#[cfg(feature = "microphone")]
mod mic {
    use std::sync::mpsc as std_mpsc;
    use std::thread;

    use async_trait::async_trait;
    use bytes::Bytes;
    use cpal::SampleFormat;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tracing::{debug, error, info};

    use super::CaptureDevice;
    use crate::core::audio::source::ChunkSink;
    use crate::errors::{TranscribeError, TranscribeResult};

    /// Outcome of building the input stream, reported back from the capture
    /// thread.
    type BuildReport = Result<u32, String>;

    /// Live microphone capture via cpal.
    ///
    /// The cpal stream is not `Send`, so it is built and owned by a
    /// dedicated thread; the thread parks on a control channel and drops the
    /// stream (stopping capture) when told to stop or when the stream
    /// reports a hard error.
    pub struct MicrophoneDevice {
        device_name: Option<String>,
        worker: Option<Worker>,
    }

    struct Worker {
        stop_tx: std_mpsc::Sender<()>,
        thread: Option<thread::JoinHandle<()>>,
    }

    impl MicrophoneDevice {
        /// Capture from the system default input device.
        pub fn default_input() -> Self {
            Self {
                device_name: None,
                worker: None,
            }
        }

        /// Capture from a named input device.
        pub fn named(name: impl Into<String>) -> Self {
            Self {
                device_name: Some(name.into()),
                worker: None,
            }
        }
    }

    #[async_trait]
    impl CaptureDevice for MicrophoneDevice {
        fn id(&self) -> String {
            self.device_name
                .clone()
                .unwrap_or_else(|| "default-input".to_string())
        }

        async fn start(&mut self, sink: ChunkSink) -> TranscribeResult<()> {
            if self.worker.is_some() {
                return Err(TranscribeError::Capture(
                    "microphone already capturing".to_string(),
                ));
            }

            let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<BuildReport>();
            let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
            let err_stop_tx = stop_tx.clone();
            let device_name = self.device_name.clone();

            let thread = thread::Builder::new()
                .name("mic-capture".to_string())
                .spawn(move || {
                    let built = build_stream(device_name.as_deref(), sink, err_stop_tx);
                    match built {
                        Ok((stream, sample_rate)) => {
                            let _ = ready_tx.send(Ok(sample_rate));
                            // Park until stop() or the error callback fires;
                            // dropping the stream ends capture.
                            let _ = stop_rx.recv();
                            drop(stream);
                            debug!("microphone capture thread exiting");
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                        }
                    }
                })
                .map_err(|e| TranscribeError::Capture(format!("failed to spawn capture thread: {e}")))?;

            match ready_rx.await {
                Ok(Ok(sample_rate)) => {
                    info!("microphone capture running at {sample_rate} Hz");
                    self.worker = Some(Worker {
                        stop_tx,
                        thread: Some(thread),
                    });
                    Ok(())
                }
                Ok(Err(e)) => {
                    let _ = thread.join();
                    Err(TranscribeError::Capture(e))
                }
                Err(_) => {
                    let _ = thread.join();
                    Err(TranscribeError::Capture(
                        "capture thread exited before reporting readiness".to_string(),
                    ))
                }
            }
        }

        async fn stop(&mut self) {
            if let Some(mut worker) = self.worker.take() {
                let _ = worker.stop_tx.send(());
                if let Some(thread) = worker.thread.take() {
                    let _ = tokio::task::spawn_blocking(move || {
                        let _ = thread.join();
                    })
                    .await;
                }
                debug!("microphone capture stopped");
            }
        }
    }

    impl Drop for MicrophoneDevice {
        fn drop(&mut self) {
            if let Some(worker) = self.worker.take() {
                let _ = worker.stop_tx.send(());
            }
        }
    }

    /// Build and start the cpal input stream on the capture thread.
    fn build_stream(
        device_name: Option<&str>,
        sink: ChunkSink,
        err_stop_tx: std_mpsc::Sender<()>,
    ) -> Result<(cpal::Stream, u32), String> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| format!("failed to enumerate input devices: {e}"))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| format!("input device '{name}' not found"))?,
            None => host
                .default_input_device()
                .ok_or_else(|| "no default input device".to_string())?,
        };

        let supported = device
            .default_input_config()
            .map_err(|e| format!("failed to query input config: {e}"))?;
        let sample_rate = supported.sample_rate().0;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let err_fn = move |e: cpal::StreamError| {
            error!("microphone stream failed: {e}");
            // Wake the capture thread so the stream is dropped and the chunk
            // queue ends.
            let _ = err_stop_tx.send(());
        };

        let stream = match sample_format {
            SampleFormat::I16 => device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _| push_i16(&sink, data),
                    err_fn,
                    None,
                )
                .map_err(|e| format!("failed to build input stream: {e}"))?,
            SampleFormat::F32 => device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _| {
                        let converted: Vec<i16> = data
                            .iter()
                            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                            .collect();
                        push_i16(&sink, &converted);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| format!("failed to build input stream: {e}"))?,
            SampleFormat::U16 => device
                .build_input_stream(
                    &config,
                    move |data: &[u16], _| {
                        let converted: Vec<i16> = data
                            .iter()
                            .map(|s| (*s as i32 - 32768) as i16)
                            .collect();
                        push_i16(&sink, &converted);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| format!("failed to build input stream: {e}"))?,
            other => return Err(format!("unsupported sample format {other:?}")),
        };

        stream
            .play()
            .map_err(|e| format!("failed to start input stream: {e}"))?;

        Ok((stream, sample_rate))
    }

    /// Serialize samples as 16-bit little-endian PCM and enqueue them.
    fn push_i16(sink: &ChunkSink, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        // Consumer gone: nothing to do here, the thread is told to stop
        // through the session's source handle.
        let _ = sink.push(Bytes::from(bytes));
    }
}
