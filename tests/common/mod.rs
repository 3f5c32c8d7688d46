#![allow(dead_code)]

pub mod sources;
pub mod strategies;

pub use sources::*;
pub use strategies::*;
