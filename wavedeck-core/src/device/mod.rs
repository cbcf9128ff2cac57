pub mod virtual_device;
