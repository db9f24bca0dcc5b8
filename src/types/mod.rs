pub mod chain;
pub mod deposit;
pub mod engine;
pub mod errors;
pub mod keys;
pub mod notification;
pub mod participant;
pub mod scan;
pub mod sweep;

pub use chain::{Asset, Chain};
