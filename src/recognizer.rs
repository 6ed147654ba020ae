//! Seam for the external speech-recognition collaborator
//!
//! Recognition is advisory and visual-only; the backend commit signal is
//! authoritative. The client only ever needs to force-stop the engine,
//! which is expected to restart itself.

/// Handle to the speech-recognition engine
pub trait Recognizer: Send + Sync {
    /// Force-stop recognition; the engine auto-restarts on its own
    fn stop(&self);
}

/// No-op recognizer for deployments without a local recognition engine
#[derive(Debug, Default)]
pub struct NullRecognizer;

impl Recognizer for NullRecognizer {
    fn stop(&self) {}
}
