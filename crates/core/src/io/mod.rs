//! I/O operations for reading and writing label volumes

mod native;

pub use native::{
    read_volume, read_volume_from_buffer, write_volume, write_volume_to_buffer, SampleFormat,
    VolumeWriteOptions,
};
