//! CLI Commands

pub mod init;
pub mod server;
