pub mod config;
pub mod error;
pub mod osc;
pub mod pose;
pub mod protocol;
pub mod retarget;
pub mod stats;
