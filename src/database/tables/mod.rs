pub mod device_configs;
pub mod devices;
pub mod downlink_queue;
pub mod firmware_updates;
pub mod raw_data;
pub mod readings;
