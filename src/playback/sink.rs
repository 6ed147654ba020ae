//! Audio output seam for the playback scheduler
//!
//! The scheduler plans segments against a declarative output clock; the
//! sink renders them. [`CpalSink`] is the hardware implementation; tests
//! supply scripted sinks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use crate::config::PLAYBACK_SAMPLE_RATE;
use crate::{Error, Result};

/// Identifier of one scheduled playback source
pub type SourceId = u64;

/// Scheduled, gapless audio output
///
/// Scheduling is declarative: `schedule` never blocks, and the sink
/// reports each source's completion asynchronously after its real-time
/// playback finishes.
pub trait AudioSink: Send + Sync {
    /// Current position of the output clock, in seconds
    fn current_time(&self) -> f64;

    /// Schedule `samples` (mono, 22050 Hz) to start at `start` seconds
    /// on the output clock
    fn schedule(&self, samples: Vec<f32>, start: f64) -> SourceId;

    /// Forcibly stop and discard every scheduled and playing source;
    /// no completion events are reported for discarded sources
    fn stop_all(&self);
}

/// One scheduled segment on the output timeline
struct Segment {
    id: SourceId,
    start_sample: u64,
    samples: Vec<f32>,
}

impl Segment {
    fn end_sample(&self) -> u64 {
        self.start_sample + self.samples.len() as u64
    }
}

/// Shared render timeline between the control side and the audio callback
#[derive(Default)]
struct Timeline {
    /// Samples rendered since the stream started
    position: u64,
    segments: Vec<Segment>,
}

/// Speaker output via cpal on a dedicated thread
///
/// cpal streams are not `Send`, so the stream lives on its own thread
/// and the control side only touches the shared timeline.
pub struct CpalSink {
    timeline: Arc<Mutex<Timeline>>,
    next_id: AtomicU64,
    shutdown: Arc<AtomicBool>,
}

impl CpalSink {
    /// Open the default output device and start rendering
    ///
    /// Completed sources are reported on `completions`.
    ///
    /// # Errors
    ///
    /// Returns an error if no suitable output device or configuration
    /// is available. Device failure is fatal to playback; there is no
    /// automatic retry.
    pub fn new(completions: mpsc::UnboundedSender<SourceId>) -> Result<Self> {
        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<()>>();
        {
            let timeline = Arc::clone(&timeline);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("samvad-playback".to_string())
                .spawn(move || run_output_thread(&timeline, &shutdown, &completions, &init_tx))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        match init_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                timeline,
                next_id: AtomicU64::new(1),
                shutdown,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Audio("playback thread exited during init".to_string())),
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl AudioSink for CpalSink {
    fn current_time(&self) -> f64 {
        let position = self.timeline.lock().unwrap().position;
        #[allow(clippy::cast_precision_loss)]
        let seconds = position as f64 / f64::from(PLAYBACK_SAMPLE_RATE);
        seconds
    }

    fn schedule(&self, samples: Vec<f32>, start: f64) -> SourceId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let start_sample = (start.max(0.0) * f64::from(PLAYBACK_SAMPLE_RATE)).round() as u64;

        self.timeline.lock().unwrap().segments.push(Segment {
            id,
            start_sample,
            samples,
        });
        id
    }

    fn stop_all(&self) {
        self.timeline.lock().unwrap().segments.clear();
    }
}

fn run_output_thread(
    timeline: &Arc<Mutex<Timeline>>,
    shutdown: &Arc<AtomicBool>,
    completions: &mpsc::UnboundedSender<SourceId>,
    init_tx: &std::sync::mpsc::Sender<Result<()>>,
) {
    let build = || -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: stereo with the mono signal on both channels
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();
        let channels = config.channels as usize;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        let timeline = Arc::clone(timeline);
        let completions = completions.clone();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut timeline = timeline.lock().unwrap();

                    for frame in data.chunks_mut(channels) {
                        let pos = timeline.position;
                        let mut value = 0.0f32;
                        for segment in &timeline.segments {
                            if pos >= segment.start_sample && pos < segment.end_sample() {
                                #[allow(clippy::cast_possible_truncation)]
                                let index = (pos - segment.start_sample) as usize;
                                value += segment.samples[index];
                            }
                        }
                        for out in frame.iter_mut() {
                            *out = value;
                        }
                        timeline.position += 1;
                    }

                    let pos = timeline.position;
                    timeline.segments.retain(|segment| {
                        if pos >= segment.end_sample() {
                            let _ = completions.send(segment.id);
                            false
                        } else {
                            true
                        }
                    });
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        Ok(stream)
    };

    match build() {
        Ok(stream) => {
            let _ = init_tx.send(Ok(()));
            while !shutdown.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(50));
            }
            drop(stream);
        }
        Err(e) => {
            let _ = init_tx.send(Err(e));
        }
    }
}
