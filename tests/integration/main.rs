//! Integration test modules.

mod gatt_server_test;
