//! Bootstrap environment for cloud targets.

pub mod cloud_init;

pub use cloud_init::generate_cloud_init;
