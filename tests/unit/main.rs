//! Unit test modules.

mod codec_test;
mod sensor_discovery_test;
