mod types;

pub use types::{DeviceError, Result};
