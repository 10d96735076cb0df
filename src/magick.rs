// ABOUTME: ImageMagick subprocess adapter for image inspection and resizing
// ABOUTME: Wraps identify/convert, collecting output and failing fast on nonzero exit

use std::path::Path;

use anyhow::{anyhow, bail, Result};
use tokio::process::Command;
use tracing::info;

use crate::variant::{ResolvedParams, Variant};

/// Source image facts reported by `identify`. Recorded as metadata on the
/// stored variant, never used for control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub format: String,
    /// Pixel dimensions as reported, e.g. `3008x4000`
    pub dimensions: String,
    pub color_depth: String,
    pub color_space: String,
}

/// Inspect a materialized source image with `identify`.
pub async fn inspect(identify_bin: &str, source: &Path) -> Result<SourceInfo> {
    let stdout = run(identify_bin, &[source.display().to_string()]).await?;
    let text = String::from_utf8_lossy(&stdout);
    let line = text
        .lines()
        .next()
        .ok_or_else(|| anyhow!("identify produced no output for {}", source.display()))?;
    parse_identify_line(line)
}

/// Parse one line of `identify` output:
/// `/tmp/f5bb4094 JPEG 3008x4000 3008x4000+0+0 8-bit sRGB 2.49426MiB 0.010u 0:00.004`
fn parse_identify_line(line: &str) -> Result<SourceInfo> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        bail!("unexpected identify output: {}", line);
    }
    Ok(SourceInfo {
        format: fields[1].to_string(),
        dimensions: fields[2].to_string(),
        color_depth: fields[4].to_string(),
        color_space: fields[5].to_string(),
    })
}

/// Transcode the source into a WebP variant with `convert`. The output
/// format is carried by the output path's `.webp` extension.
pub async fn transcode(
    convert_bin: &str,
    source: &Path,
    output: &Path,
    variant: Variant,
    params: &ResolvedParams,
) -> Result<()> {
    if variant == Variant::Raw {
        bail!("raw variant is served without transcoding");
    }
    let args = transform_args(source, output, variant, params);
    info!("Running {}: {:?}", convert_bin, args);
    run(convert_bin, &args).await?;
    Ok(())
}

/// `convert` arguments per variant. Thumbnails and placeholders cover a
/// square then center-crop, and have their metadata stripped; scaled keeps
/// the aspect ratio and its metadata.
fn transform_args(source: &Path, output: &Path, variant: Variant, params: &ResolvedParams) -> Vec<String> {
    let w = params.width;
    let quality = (params.quality * 10).to_string();
    match variant {
        Variant::Thumb | Variant::Placeholder => vec![
            source.display().to_string(),
            "-thumbnail".into(),
            format!("{w}x{w}^"),
            "-gravity".into(),
            "center".into(),
            "-crop".into(),
            format!("{w}x{w}+0+0"),
            "-quality".into(),
            quality,
            "-strip".into(),
            output.display().to_string(),
        ],
        _ => vec![
            source.display().to_string(),
            "-resize".into(),
            format!("{w}x"),
            "-quality".into(),
            quality,
            output.display().to_string(),
        ],
    }
}

/// Run a command to completion, collecting stdout. A nonzero exit is an
/// error carrying the captured stderr.
async fn run(program: &str, args: &[String]) -> Result<Vec<u8>> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| anyhow!("failed to run {}: {}", program, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{} exited with {}: {}", program, output.status, stderr.trim());
    }

    Ok(output.stdout)
}
