//! Scriptorium document renderers.
//!
//! Both renderers implement [`pipeline::DocumentRenderer`]:
//!
//! | Renderer | Artifact |
//! |----------|----------|
//! | [`HtmlRenderer`] | Self-contained, print-styled HTML with a title page |
//! | [`CommandRenderer`] | Whatever an external converter (e.g. `weasyprint`) makes of that HTML |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Markdown conversion, styling, image embedding and
//! process spawning live here.

mod command;
mod html;

pub use command::CommandRenderer;
pub use html::{HtmlRenderer, DEFAULT_TITLE};
