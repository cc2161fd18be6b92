pub mod core;

pub use core::{Chain, Transform};
