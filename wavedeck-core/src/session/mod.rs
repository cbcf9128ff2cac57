pub mod capture;
pub mod playback;
pub mod station;
pub mod transport;
