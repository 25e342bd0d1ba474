//! Command APDUs understood by the WIM application

pub mod binary;
pub use binary::*;
pub mod generate_key;
pub use generate_key::*;
pub mod mse;
pub use mse::*;
pub mod pso;
pub use pso::*;
pub mod select;
pub use select::*;
pub mod verify;
pub use verify::*;
