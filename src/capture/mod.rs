pub mod backend;
pub mod frame;
pub mod normalize;

pub use backend::{BackendError, CameraBackend, StatusCode, SyntheticBackend};
pub use frame::{NormalizedImage, PixelFormat, RawFrame};
pub use normalize::{normalize, DemosaicMethod, NormalizeError, PixelConvert};
