#[cfg(feature = "desktop")]
pub mod capture;
pub mod device;
pub mod frame;
pub mod source;

#[cfg(feature = "desktop")]
pub use capture::{OpenCvCamera, OpenCvFactory};
pub use device::{CaptureDevice, DeviceFactory};
pub use frame::Frame;
pub use source::{FrameSource, FrameSourceStatus};
