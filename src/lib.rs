pub mod config;
pub mod evm;
pub mod oracle;
pub mod scheduler;
pub mod schema;
pub mod services;
pub mod solana;
pub mod storage;
pub mod tg_bot;
pub mod types;
pub mod utils;
