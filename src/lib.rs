#![forbid(unsafe_code)]

//! Request/response glue for a small video downloader service: typed views of
//! the extractor output, format selection, filename handling, and the
//! downloads directory served back to clients.

pub mod collaborator;
pub mod config;
pub mod downloads;
pub mod error;
pub mod filename;
pub mod media;
pub mod selector;
