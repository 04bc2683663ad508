//! Audio playback to speakers
//!
//! `AudioPlayback` owns the queue of chunks received from the remote service
//! and renders them one at a time through an [`AudioSink`]. Lifecycle events
//! (`Started` before the first chunk of a burst, `Ended` once the queue runs
//! dry or is stopped) are the authoritative "remote is speaking" signal.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tokio::sync::{mpsc, oneshot, watch};

use super::context::{AudioContext, output_config};
use super::{PLAYBACK_SAMPLE_RATE, PlaybackChunk, resample_block};
use crate::{Error, Result};

/// Playback lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// First chunk of a burst is about to render
    Started,
    /// The burst finished or was stopped
    Ended,
}

/// A serialized queue of playback chunks
pub trait PlaybackUnit: Send + Sync {
    /// Append a chunk; returns immediately
    fn enqueue(&self, chunk: PlaybackChunk);

    /// Drop everything queued and halt the chunk in flight
    fn stop(&self);

    /// Stop and release the output device
    fn close(&self);

    /// Whether a burst is in progress
    fn is_playing(&self) -> bool;
}

/// Renders decoded samples to an output
#[async_trait]
pub trait AudioSink: Send + Sync + 'static {
    /// Render mono samples, resolving when fully played or halted
    ///
    /// # Errors
    ///
    /// Returns error if the output cannot be opened
    async fn play(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()>;

    /// Cut off the samples currently rendering
    fn halt(&self);

    /// Release the output device
    fn close(&self);
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<PlaybackChunk>,
    draining: bool,
}

struct Inner<S> {
    sink: S,
    state: Mutex<QueueState>,
    generation: watch::Sender<u64>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl<S> Inner<S> {
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.events.send(event);
    }
}

/// Queued, strictly ordered playback
///
/// Requires a tokio runtime: each burst is drained by a spawned task.
pub struct AudioPlayback<S: AudioSink> {
    inner: Arc<Inner<S>>,
}

impl<S: AudioSink> AudioPlayback<S> {
    /// Create a playback unit rendering through `sink`
    #[must_use]
    pub fn new(sink: S) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (generation, _) = watch::channel(0);

        let playback = Self {
            inner: Arc::new(Inner {
                sink,
                state: Mutex::new(QueueState::default()),
                generation,
                events,
            }),
        };

        (playback, rx)
    }

    /// Number of chunks waiting behind the one in flight
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Access the sink
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.inner.sink
    }
}

impl<S: AudioSink> PlaybackUnit for AudioPlayback<S> {
    fn enqueue(&self, chunk: PlaybackChunk) {
        let mut state = self.inner.lock();
        state.queue.push_back(chunk);

        if !state.draining {
            state.draining = true;
            self.inner.emit(PlaybackEvent::Started);

            let generation = *self.inner.generation.borrow();
            tokio::spawn(drain(Arc::clone(&self.inner), generation));
        }
    }

    fn stop(&self) {
        let mut state = self.inner.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        self.inner.generation.send_modify(|g| *g += 1);
        self.inner.sink.halt();

        if std::mem::take(&mut state.draining) {
            self.inner.emit(PlaybackEvent::Ended);
            tracing::debug!(dropped, "playback stopped");
        }
    }

    fn close(&self) {
        self.stop();
        self.inner.sink.close();
    }

    fn is_playing(&self) -> bool {
        self.inner.lock().draining
    }
}

/// Render queued chunks until the queue is empty or the generation moves on
async fn drain<S: AudioSink>(inner: Arc<Inner<S>>, generation: u64) {
    loop {
        let (chunk, mut cancelled) = {
            let mut state = inner.lock();
            if *inner.generation.borrow() != generation {
                return;
            }
            match state.queue.pop_front() {
                Some(chunk) => (chunk, inner.generation.subscribe()),
                None => {
                    state.draining = false;
                    inner.emit(PlaybackEvent::Ended);
                    return;
                }
            }
        };

        let samples = match chunk.decode() {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(error = %e, bytes = chunk.data().len(), "skipping undecodable chunk");
                continue;
            }
        };

        tokio::select! {
            biased;
            _ = cancelled.changed() => return,
            result = inner.sink.play(samples, chunk.sample_rate()) => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "playback chunk failed");
                }
            }
        }
    }
}

/// Chunk currently being rendered by the output callback
struct ActiveChunk {
    id: u64,
    samples: Vec<f32>,
    position: usize,
    done: Option<oneshot::Sender<()>>,
}

type ActiveSlot = Arc<Mutex<Option<ActiveChunk>>>;

/// Clears the slot on drop if it still holds chunk `id`
///
/// A `play` future dropped mid-chunk must not leave its samples rendering.
struct ChunkGuard {
    slot: ActiveSlot,
    id: u64,
}

impl Drop for ChunkGuard {
    fn drop(&mut self) {
        let mut active = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|chunk| chunk.id == self.id) {
            active.take();
        }
    }
}

/// Running output thread
struct OutputWorker {
    slot: ActiveSlot,
    device_rate: u32,
    stop_tx: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Output sink backed by a persistent cpal stream
///
/// The device is opened on first use and held until `close`; a later `play`
/// reopens it.
pub struct CpalSink {
    context: AudioContext,
    worker: Mutex<Option<OutputWorker>>,
    next_chunk: AtomicU64,
}

impl CpalSink {
    /// Create a sink for the context's output device
    #[must_use]
    pub const fn new(context: AudioContext) -> Self {
        Self {
            context,
            worker: Mutex::new(None),
            next_chunk: AtomicU64::new(0),
        }
    }

    /// Open the output device if needed, returning the render slot and device rate
    fn ensure_open(&self) -> Result<(ActiveSlot, u32)> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(w) = worker.as_ref() {
            return Ok((Arc::clone(&w.slot), w.device_rate));
        }

        let slot: ActiveSlot = Arc::new(Mutex::new(None));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<u32>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let context = self.context.clone();
        let thread_slot = Arc::clone(&slot);

        let handle = std::thread::Builder::new()
            .name("beacon-live-playback".to_string())
            .spawn(move || {
                let stream = match open_output_stream(&context, thread_slot) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| {
                Error::DeviceUnavailable(format!("failed to spawn playback thread: {e}"))
            })?;

        let device_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(Error::DeviceUnavailable(
                    "playback thread exited before opening the device".to_string(),
                ));
            }
        };

        *worker = Some(OutputWorker {
            slot: Arc::clone(&slot),
            device_rate,
            stop_tx,
            handle,
        });

        Ok((slot, device_rate))
    }

    fn start_chunk(
        slot: &ActiveSlot,
        id: u64,
        samples: Vec<f32>,
    ) -> (ChunkGuard, oneshot::Receiver<()>) {
        let (done, rx) = oneshot::channel();
        let guard = ChunkGuard {
            slot: Arc::clone(slot),
            id,
        };

        let mut active = slot.lock().unwrap_or_else(PoisonError::into_inner);
        *active = Some(ActiveChunk {
            id,
            samples,
            position: 0,
            done: Some(done),
        });
        (guard, rx)
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn play(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        let (slot, device_rate) = self.ensure_open()?;

        let samples = if sample_rate == device_rate {
            samples
        } else {
            resample_block(&samples, sample_rate, device_rate)?
        };
        if samples.is_empty() {
            return Ok(());
        }

        let count = samples.len();
        let id = self.next_chunk.fetch_add(1, Ordering::Relaxed);
        let (_guard, done) = Self::start_chunk(&slot, id, samples);

        // A dropped sender means the chunk was halted
        let _ = done.await;
        tracing::trace!(samples = count, "chunk rendered");
        Ok(())
    }

    fn halt(&self) {
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(w) = worker.as_ref() {
            w.slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }
    }

    fn close(&self) {
        let taken = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(w) = taken {
            w.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            let _ = w.stop_tx.send(());
            if w.handle.join().is_err() {
                tracing::warn!("playback thread panicked");
            }
            tracing::debug!("audio playback closed");
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open and start the output stream on the current thread
fn open_output_stream(context: &AudioContext, slot: ActiveSlot) -> Result<(Stream, u32)> {
    let device = context.output_device()?;
    let supported = output_config(&device, PLAYBACK_SAMPLE_RATE)?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();

    let stream = match sample_format {
        SampleFormat::F32 => build_output::<f32>(&device, &config, slot),
        SampleFormat::I16 => build_output::<i16>(&device, &config, slot),
        SampleFormat::U16 => build_output::<u16>(&device, &config, slot),
        other => Err(Error::DeviceUnavailable(format!(
            "unsupported output sample format: {other:?}"
        ))),
    }?;

    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "audio playback initialized"
    );

    Ok((stream, config.sample_rate.0))
}

fn build_output<T>(device: &Device, config: &StreamConfig, slot: ActiveSlot) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels).max(1);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut active = slot.lock().unwrap_or_else(PoisonError::into_inner);
                for frame in data.chunks_mut(channels) {
                    let value = T::from_sample(next_sample(&mut active));
                    for out in frame.iter_mut() {
                        *out = value;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))
}

/// Pull one sample from the active chunk, completing it at the end
fn next_sample(active: &mut Option<ActiveChunk>) -> f32 {
    let Some(chunk) = active.as_mut() else {
        return 0.0;
    };

    let sample = chunk.samples.get(chunk.position).copied().unwrap_or(0.0);
    chunk.position += 1;

    if chunk.position >= chunk.samples.len()
        && let Some(done) = active.take().and_then(|c| c.done)
    {
        let _ = done.send(());
    }

    sample
}
