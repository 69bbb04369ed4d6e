// Library root: re-exports the board runner and configuration so the binary
// and integration tests share them.

pub mod board;
pub mod config;
