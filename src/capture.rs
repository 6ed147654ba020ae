//! Microphone capture: fixed-cadence frames for the signal channel
//!
//! Runs on a dedicated thread (cpal streams are not `Send`) and talks to
//! the control loop only through a one-way frame channel. The mute flag
//! is the only other state crossing that boundary, and it is read-only
//! from the audio callback's point of view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use crate::config::{CAPTURE_SAMPLE_RATE, FRAME_SAMPLES};
use crate::{Error, Result};

/// Captures 512-sample 16 kHz mono frames and forwards them as LE bytes
pub struct CapturePipeline {
    mute: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl CapturePipeline {
    /// Open the default input device and start producing frames
    ///
    /// Frames flow into `frames_tx` until the pipeline is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if no suitable input device or configuration is
    /// available. Device-acquisition failure is fatal to the sensory
    /// layer; there is no automatic retry.
    pub fn start(frames_tx: mpsc::UnboundedSender<Vec<u8>>, muted: bool) -> Result<Self> {
        let mute = Arc::new(AtomicBool::new(muted));
        let shutdown = Arc::new(AtomicBool::new(false));

        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<()>>();
        {
            let mute = Arc::clone(&mute);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("samvad-capture".to_string())
                .spawn(move || run_input_thread(&frames_tx, &mute, &shutdown, &init_tx))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        match init_rx.recv() {
            Ok(Ok(())) => Ok(Self { mute, shutdown }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Audio("capture thread exited during init".to_string())),
        }
    }

    /// Whether the microphone is muted
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.mute.load(Ordering::SeqCst)
    }

    /// Gate frame forwarding without stopping the stream
    pub fn set_muted(&self, muted: bool) {
        self.mute.store(muted, Ordering::SeqCst);
        tracing::debug!(muted, "microphone mute changed");
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_input_thread(
    frames_tx: &mpsc::UnboundedSender<Vec<u8>>,
    mute: &Arc<AtomicBool>,
    shutdown: &Arc<AtomicBool>,
    init_tx: &std::sync::mpsc::Sender<Result<()>>,
) {
    let build = || -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(CAPTURE_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(CAPTURE_SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable input config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(CAPTURE_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = CAPTURE_SAMPLE_RATE,
            frame_samples = FRAME_SAMPLES,
            "audio capture initialized"
        );

        let frames_tx = frames_tx.clone();
        let mute = Arc::clone(mute);
        // one frame of backing store; never buffers beyond it
        let mut frame: Vec<i16> = Vec::with_capacity(FRAME_SAMPLES);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for &sample in data {
                        let s = sample.clamp(-1.0, 1.0);
                        #[allow(clippy::cast_possible_truncation)]
                        let value = if s < 0.0 {
                            (s * 32768.0) as i16
                        } else {
                            (s * 32767.0) as i16
                        };
                        frame.push(value);

                        if frame.len() == FRAME_SAMPLES {
                            if !mute.load(Ordering::Relaxed) {
                                let mut bytes = Vec::with_capacity(FRAME_SAMPLES * 2);
                                for s in &frame {
                                    bytes.extend_from_slice(&s.to_le_bytes());
                                }
                                let _ = frames_tx.send(bytes);
                            }
                            frame.clear();
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
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
