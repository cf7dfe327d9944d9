pub mod daemon;
pub mod init;
pub mod query;
pub mod sync;
