pub mod controller;

pub use controller::{Herald, SHUTDOWN_BROADCAST};
