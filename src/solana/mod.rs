use thiserror::Error;

pub mod rpc_pool;
pub mod scanner;
pub mod sweeper;
pub mod tx_parser;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Account not found")]
    AccountNotFound,
}
