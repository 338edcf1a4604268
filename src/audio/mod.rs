pub mod backend;
pub mod batcher;
pub mod capture;
pub mod file;
pub mod playback;

pub use backend::{AudioBackend, AudioBackendFactory, AudioFormat, AudioFrame, AudioSource};
pub use batcher::FrameBatcher;
pub use capture::{list_input_devices, MicrophoneBackend};
pub use file::{AudioFile, WavFileBackend};
pub use playback::{CpalOutputDevice, JitterPlaybackSink, OutputDevice};
