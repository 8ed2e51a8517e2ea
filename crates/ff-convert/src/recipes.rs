//! Command recipes and the tool-backed [`Converter`].
//!
//! A recipe is one or more argument templates run in order against the
//! same workspace. Placeholders:
//!
//! | placeholder | expands to |
//! |-------------|------------|
//! | `{input}`   | uploaded file |
//! | `{output}`  | expected output file |
//! | `{outdir}`  | directory holding `{output}` |
//! | `{scratch}` | scratch directory |
//! | `{format}`  | target extension |

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ff_core::{Operation, Result};

use crate::command::ToolCommand;
use crate::converter::{normalize_format, ConversionInput, ConversionOutput, Converter};
use crate::tools::ToolRegistry;
use crate::workspace::ConversionWorkspace;

/// How one operation is carried out.
#[derive(Debug, Clone, Copy)]
pub struct Recipe {
    /// Registry name of the tool.
    pub tool: &'static str,
    pub steps: &'static [&'static [&'static str]],
}

const PDF: Recipe = Recipe {
    tool: "libreoffice",
    steps: &[&[
        "--headless",
        "--convert-to",
        "{format}",
        "--outdir",
        "{outdir}",
        "{input}",
    ]],
};

const IMAGE: Recipe = Recipe {
    tool: "magick",
    steps: &[&["{input}", "{output}"]],
};

const VIDEO: Recipe = Recipe {
    tool: "ffmpeg",
    steps: &[&["-y", "-nostdin", "-i", "{input}", "{output}"]],
};

const VIDEO_COMPRESS: Recipe = Recipe {
    tool: "ffmpeg",
    steps: &[&[
        "-y", "-nostdin", "-i", "{input}", "-c:v", "libx264", "-crf", "28", "-preset",
        "veryfast", "-c:a", "aac", "-b:a", "128k", "{output}",
    ]],
};

const AUDIO: Recipe = Recipe {
    tool: "ffmpeg",
    steps: &[&["-y", "-nostdin", "-i", "{input}", "-vn", "{output}"]],
};

const ARCHIVE: Recipe = Recipe {
    tool: "7z",
    steps: &[
        &["x", "-y", "-o{scratch}", "{input}"],
        &["a", "-y", "{output}", "{scratch}/*"],
    ],
};

const TEXT: Recipe = Recipe {
    tool: "pandoc",
    steps: &[&["{input}", "-o", "{output}"]],
};

pub fn recipe_for(operation: Operation) -> Recipe {
    match operation {
        Operation::PdfConvert => PDF,
        Operation::ImageConvert => IMAGE,
        Operation::VideoConvert => VIDEO,
        Operation::VideoCompress => VIDEO_COMPRESS,
        Operation::AudioConvert => AUDIO,
        Operation::ArchiveConvert => ARCHIVE,
        Operation::TextConvert => TEXT,
    }
}

fn expand(template: &str, ws: &ConversionWorkspace, format: &str) -> String {
    template
        .replace("{input}", &display(ws.input()))
        .replace("{output}", &display(ws.output()))
        .replace("{outdir}", &display(&ws.output_dir()))
        .replace("{scratch}", &display(&ws.scratch_dir()))
        .replace("{format}", format)
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Production [`Converter`] running external tools.
pub struct ToolConverter {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolConverter {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }
}

#[async_trait]
impl Converter for ToolConverter {
    async fn convert(&self, input: ConversionInput) -> Result<ConversionOutput> {
        let format = normalize_format(&input.target_format)?;
        let source_ext = input
            .source_ext
            .as_deref()
            .map(normalize_format)
            .transpose()?;

        let recipe = recipe_for(input.operation);
        let program = self.registry.require(recipe.tool)?;

        let ws = ConversionWorkspace::new(source_ext.as_deref(), &format)?;
        ws.write_input(&input.data).await?;

        for step in recipe.steps {
            ToolCommand::new(program)
                .args(step.iter().map(|arg| expand(arg, &ws, &format)))
                .timeout(self.timeout)
                .current_dir(ws.root())
                .execute()
                .await?;
        }

        let data = ws.read_output(recipe.tool).await?;
        tracing::debug!(
            operation = %input.operation,
            format = %format,
            bytes_in = input.data.len(),
            bytes_out = data.len(),
            "Conversion finished"
        );
        Ok(ConversionOutput::new(data, format))
    }
}
