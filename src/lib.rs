#![forbid(unsafe_code)]

//! Library backing the `seo_update` binary: pulls upload metadata for a set of
//! YouTube channels, writes SEO descriptions and tags with a chat-completion
//! model and pushes the results back to the platform.

pub mod config;
pub mod credentials;
pub mod export;
pub mod generation;
pub mod metadata;
pub mod pipeline;
pub mod retry;
pub mod security;
pub mod youtube;
