//! Scriptorium search infrastructure adapter.
//!
//! Implements [`pipeline::WebSearch`] and [`pipeline::ImageSource`] against
//! the [Serper](https://serper.dev) Google search API.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Request payloads, API-key headers, response shapes and
//! image downloading live here. The [`pipeline`] crate sees only the port
//! traits and [`pipeline::CollaboratorError`].

mod serper;

pub use serper::{SerperClient, SerperConfig, DEFAULT_MAX_IMAGE_BYTES, DEFAULT_SERPER_ENDPOINT};
