//! Host checks around a maintenance run

pub mod privilege;
pub mod reboot;

pub use privilege::*;
pub use reboot::*;
