pub mod audio_device;
pub mod device_directory;
pub mod stream_delegate;
