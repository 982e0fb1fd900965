pub mod archive;
pub mod blob;
pub mod provisioner;

pub use provisioner::{ensure_assets, logging_progress, Provisioned};
