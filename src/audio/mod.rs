//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;
pub mod tap;

pub use buffer::AudioFrame;
pub use capture::CpalCapture;
pub use device::{list_devices, open_board, AudioDevice, AudioFormat, CpalDevice, HalfDuplex};
pub use playback::CpalPlayback;
pub use tap::TappedDevice;
