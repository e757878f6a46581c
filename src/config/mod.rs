// Runtime configuration assembled from the command line
mod transfer_config;

pub use transfer_config::TransferConfig;
