//! Terminal-side collaborators of the reading engine: the cell-grid
//! measurement oracle and the book sources.

pub mod layout;
pub mod source;

pub use layout::{justify, render_lines, wrap_paragraph, CellGridOracle, STATUS_ROWS};
pub use source::{trim_gutenberg, DirectorySource, HttpSource};
