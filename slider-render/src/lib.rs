//! # slider-render
//!
//! Page templates for the slider server.
//!
//! Slide pages themselves come out of `slider-core`; this crate renders the
//! pages around them (deck index, error pages) with Askama and carries the
//! built-in stylesheet.

pub mod style;
pub mod templates;

pub use style::STYLESHEET;
pub use templates::{DeckEntry, ErrorTemplate, IndexTemplate, PageError};
