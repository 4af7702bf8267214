pub mod actuator;
pub mod average;
pub mod crc;
pub mod model;
pub mod pid;
pub mod sampler;
