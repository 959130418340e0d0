pub mod sensors;
pub mod status_file;

// Re-export commonly used items
pub use sensors::{CpuSensor, SystemSensors, TemperatureSource};
pub use status_file::{StatusFile, StatusRecord};
