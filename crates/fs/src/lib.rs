//! Relational tables as plain-text files
//!
//! Each top-level directory of a mount is a database and each file inside
//! it is a table: the first line is the column-definition header and every
//! further line is one row. Editing a file and closing it turns the changed
//! lines into row inserts and deletes; writing a new file creates a table.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod text_fs;

#[cfg(feature = "fuse")]
pub mod fuse;

pub use config::MountConfig;
pub use error::FsError;
pub use text_fs::{TextFs, TextFsOptions};
