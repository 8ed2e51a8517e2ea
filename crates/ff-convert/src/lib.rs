//! # ff-convert
//!
//! The boundary between admission and the external converter binaries.
//!
//! - **[`Converter`]**: "run a conversion, get bytes or a failure". The HTTP
//!   layer only ever talks to this trait.
//! - **[`ToolRegistry`]**: discovers ffmpeg, ImageMagick, LibreOffice, 7-Zip
//!   and pandoc on `PATH` or at configured locations.
//! - **[`ToolCommand`]**: async builder that runs a tool with a timeout.
//! - **[`ConversionWorkspace`]**: per-request temp directory holding the
//!   input and output files.
//! - **[`ToolConverter`]**: the production [`Converter`], mapping each
//!   operation to a command recipe.

pub mod command;
pub mod converter;
pub mod recipes;
pub mod tools;
pub mod workspace;

pub use command::{ToolCommand, ToolOutput};
pub use converter::{
    content_type_for, normalize_format, ConversionInput, ConversionOutput, Converter,
};
pub use recipes::{recipe_for, Recipe, ToolConverter};
pub use tools::{ToolInfo, ToolRegistry};
pub use workspace::ConversionWorkspace;
