//! Event recordings of processor runs and their replay.

pub mod recorder;
pub mod replay;

pub use recorder::{
    ExecutionRecorder, RecordedEvent, RecorderOptions, Recording, SerializedRecording,
    RECORDING_VERSION,
};
