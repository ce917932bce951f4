//! fnpkg archive: turn local files into archive descriptors and back.

#![forbid(unsafe_code)]

pub mod resolve;
pub mod transfer;

pub use resolve::ArchiveResolver;
pub use transfer::{has_zip_magic, is_zip, ArchiveFetcher};
