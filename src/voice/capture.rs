//! Audio capture from microphone
//!
//! The device stream lives on a dedicated capture thread. Its callback only
//! downmixes, resamples and frames samples, then hands each completed frame
//! to an unbounded channel; it never waits on the caller or the network.
//!
//! cpal exposes no echo cancellation or noise suppression controls, so the
//! unit opens the platform's default input path and relies on any OS-level
//! processing configured there.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::context::{AudioContext, input_config};
use super::{AudioFrame, CAPTURE_SAMPLE_RATE, Framer, StreamResampler, downmix};
use crate::{Error, Result};

/// Channel end receiving captured frames
pub type FrameSender = mpsc::UnboundedSender<AudioFrame>;

/// A source of canonical PCM frames
///
/// Two units must not be started on the same device at once; this is the
/// caller's responsibility and is not arbitrated here.
pub trait CaptureUnit: Send {
    /// Acquire the input device and begin delivering frames to `frames`
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceUnavailable` if the device cannot be opened
    fn start(&mut self, frames: FrameSender) -> Result<()>;

    /// Release the device; no frame is delivered after this returns
    fn stop(&mut self);

    /// Whether the device is currently held
    fn is_capturing(&self) -> bool;
}

/// Callback-side frame assembly
///
/// Converts device-shaped sample slices into canonical frames and forwards
/// them while the active flag is set.
pub struct FrameDispatcher {
    active: Arc<AtomicBool>,
    channels: usize,
    resampler: StreamResampler,
    framer: Framer,
    frames: FrameSender,
    converted: Vec<f32>,
}

impl FrameDispatcher {
    /// Create a dispatcher for a device running at `device_rate` with `channels`
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be built for the device rate
    pub fn new(
        frames: FrameSender,
        frame_samples: usize,
        device_rate: u32,
        channels: usize,
    ) -> Result<Self> {
        Ok(Self {
            active: Arc::new(AtomicBool::new(true)),
            channels,
            resampler: StreamResampler::new(device_rate, CAPTURE_SAMPLE_RATE)?,
            framer: Framer::new(frame_samples, CAPTURE_SAMPLE_RATE),
            frames,
            converted: Vec::new(),
        })
    }

    /// Shared flag gating frame delivery
    #[must_use]
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }

    /// Stop delivering frames
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Feed interleaved device samples
    pub fn push(&mut self, interleaved: &[f32]) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }

        let mono = downmix(interleaved, self.channels);
        self.converted.clear();
        self.resampler.process(&mono, &mut self.converted);

        let active = &self.active;
        let frames = &self.frames;
        self.framer.push(&self.converted, |frame| {
            if active.load(Ordering::Acquire) {
                // Receiver gone means the session was torn down
                let _ = frames.send(frame);
            }
        });
    }
}

/// Running capture thread
struct CaptureWorker {
    active: Arc<AtomicBool>,
    stop_tx: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Captures audio from the configured input device
pub struct AudioCapture {
    context: AudioContext,
    frame_samples: usize,
    worker: Option<CaptureWorker>,
}

impl AudioCapture {
    /// Create a capture unit; the device is not opened until `start`
    #[must_use]
    pub const fn new(context: AudioContext, frame_samples: usize) -> Self {
        Self {
            context,
            frame_samples,
            worker: None,
        }
    }

    /// Samples per delivered frame
    #[must_use]
    pub const fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Get the sample rate of delivered frames
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        CAPTURE_SAMPLE_RATE
    }
}

impl CaptureUnit for AudioCapture {
    fn start(&mut self, frames: FrameSender) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<Arc<AtomicBool>>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let context = self.context.clone();
        let frame_samples = self.frame_samples;

        let handle = std::thread::Builder::new()
            .name("beacon-live-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(&context, frame_samples, frames) {
                    Ok((stream, active)) => {
                        let _ = ready_tx.send(Ok(active));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until stop is requested or the unit is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| Error::DeviceUnavailable(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(active)) => {
                self.worker = Some(CaptureWorker {
                    active,
                    stop_tx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::DeviceUnavailable(
                    "capture thread exited before opening the device".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.active.store(false, Ordering::Release);
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                tracing::warn!("capture thread panicked");
            }
            tracing::debug!("audio capture stopped");
        }
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open and start the input stream on the current thread
fn open_input_stream(
    context: &AudioContext,
    frame_samples: usize,
    frames: FrameSender,
) -> Result<(Stream, Arc<AtomicBool>)> {
    let device = context.input_device()?;
    let supported = input_config(&device, CAPTURE_SAMPLE_RATE)?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();

    let dispatcher = FrameDispatcher::new(
        frames,
        frame_samples,
        config.sample_rate.0,
        usize::from(config.channels),
    )?;
    let active = dispatcher.active_flag();

    let stream = match sample_format {
        SampleFormat::F32 => build_input::<f32>(&device, &config, dispatcher),
        SampleFormat::I16 => build_input::<i16>(&device, &config, dispatcher),
        SampleFormat::U16 => build_input::<u16>(&device, &config, dispatcher),
        other => Err(Error::DeviceUnavailable(format!(
            "unsupported input sample format: {other:?}"
        ))),
    }?;

    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        device_rate = config.sample_rate.0,
        channels = config.channels,
        frame_samples,
        "audio capture started"
    );

    Ok((stream, active))
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    mut dispatcher: FrameDispatcher,
) -> Result<Stream>
where
    T: SizedSample,
    f32: cpal::FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| f32::from_sample(s)));
                dispatcher.push(&scratch);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))
}
