pub mod decimals;
pub mod keys;
