//! Before/after cross-fade rendering through ffmpeg.
//!
//! Both stills are staged to uniquely named temp files that are removed when
//! the render returns, whichever way it returns. The animation itself is read
//! from ffmpeg's stdout, so no output file is ever written.

use crate::asset::{ImageAsset, MediaType};
use crate::config::TransitionConfig;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempPath;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("invalid transition parameters: {0}")]
    Invalid(String),

    #[error("failed to stage input: {0}")]
    Staging(#[source] std::io::Error),

    #[error("failed to spawn {program} (is it installed and on PATH?): {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoder exited with {status}: {stderr}")]
    Encoder { status: String, stderr: String },

    #[error("encoder produced no output")]
    EmptyOutput,
}

pub struct TransitionRenderer {
    program: String,
    fps: u32,
    temp_dir: PathBuf,
}

impl TransitionRenderer {
    pub fn new(config: &TransitionConfig) -> Self {
        Self {
            program: config.ffmpeg_path.clone(),
            fps: config.fps,
            temp_dir: config
                .temp_dir
                .as_ref()
                .map_or_else(std::env::temp_dir, PathBuf::from),
        }
    }

    /// Render a looping GIF that fades from `from` to `to` over `duration`
    pub async fn render(
        &self,
        from: &ImageAsset,
        to: &ImageAsset,
        width: u32,
        height: u32,
        duration: Duration,
    ) -> Result<ImageAsset, TransitionError> {
        if from.is_empty() || to.is_empty() {
            return Err(TransitionError::Invalid("both stills are required".to_string()));
        }
        if width == 0 || height == 0 {
            return Err(TransitionError::Invalid(
                "width and height must be positive".to_string(),
            ));
        }
        if duration.is_zero() {
            return Err(TransitionError::Invalid("duration must be positive".to_string()));
        }

        let run_id = format!("{:016x}", rand::random::<u64>());
        let input_a = stage(&self.temp_dir, &format!("morph_{run_id}_a"), from)?;
        let input_b = stage(&self.temp_dir, &format!("morph_{run_id}_b"), to)?;

        let seconds = format!("{:.3}", duration.as_secs_f64());
        let filter = filter_graph(width, height, &seconds, self.fps);

        log::debug!(
            "Rendering {}x{} transition over {}s (run {})",
            width,
            height,
            seconds,
            run_id
        );

        let output = Command::new(&self.program)
            .args(["-y", "-loglevel", "error"])
            .args(["-loop", "1", "-t", &seconds, "-i"])
            .arg(&*input_a)
            .args(["-loop", "1", "-t", &seconds, "-i"])
            .arg(&*input_b)
            .args(["-filter_complex", &filter])
            .args(["-gifflags", "+transdiff", "-loop", "0", "-f", "gif", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TransitionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TransitionError::Encoder {
                status: output.status.to_string(),
                stderr,
            });
        }

        if output.stdout.is_empty() {
            return Err(TransitionError::EmptyOutput);
        }

        Ok(ImageAsset::new(output.stdout, MediaType::Gif))
    }
}

/// Write `asset` to a fresh temp file named `<prefix>XXXXXX<ext>`.
/// The file is deleted when the returned path is dropped.
fn stage(dir: &Path, prefix: &str, asset: &ImageAsset) -> Result<TempPath, TransitionError> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(MediaType::sniff(asset.bytes()).extension())
        .tempfile_in(dir)
        .map_err(TransitionError::Staging)?;

    file.write_all(asset.bytes()).map_err(TransitionError::Staging)?;
    file.flush().map_err(TransitionError::Staging)?;
    Ok(file.into_temp_path())
}

/// Scale-to-fill and centre-crop both stills, fade one into the other, then
/// build and apply a palette for the GIF.
fn filter_graph(width: u32, height: u32, seconds: &str, fps: u32) -> String {
    let fit = format!(
        "scale={width}:{height}:force_original_aspect_ratio=increase,\
         crop={width}:{height}:(ow-iw)/2:(oh-ih)/2,format=rgba,setsar=1"
    );

    [
        format!("[0:v]{fit},trim=duration={seconds},setpts=PTS-STARTPTS,fade=out:st=0:d={seconds}:alpha=1[v0]"),
        format!("[1:v]{fit},trim=duration={seconds},setpts=PTS-STARTPTS,fade=in:st=0:d={seconds}:alpha=1[v1]"),
        format!("[v0][v1]overlay,fps={fps}[x]"),
        "[x]split[x1][x2]".to_string(),
        "[x1]palettegen=stats_mode=diff[p]".to_string(),
        "[x2][p]paletteuse=new=1:dither=sierra2_4a".to_string(),
    ]
    .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_png;

    fn renderer(program: &str, dir: &Path) -> TransitionRenderer {
        TransitionRenderer::new(&TransitionConfig {
            enabled: true,
            ffmpeg_path: program.to_string(),
            duration_ms: 1000,
            fps: 18,
            temp_dir: Some(dir.to_string_lossy().into_owned()),
        })
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_filter_graph_shape() {
        let graph = filter_graph(400, 300, "1.000", 18);

        assert!(graph.contains("scale=400:300:force_original_aspect_ratio=increase"));
        assert!(graph.contains("crop=400:300:(ow-iw)/2:(oh-ih)/2"));
        assert!(graph.contains("fade=out:st=0:d=1.000:alpha=1[v0]"));
        assert!(graph.contains("fade=in:st=0:d=1.000:alpha=1[v1]"));
        assert!(graph.contains("overlay,fps=18"));
        assert!(graph.ends_with("paletteuse=new=1:dither=sierra2_4a"));
    }

    #[test]
    fn test_stage_uses_sniffed_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = stage(dir.path(), "morph_test_a", &sample_png(2, 2)).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("morph_test_a"));
        assert!(name.ends_with(".png"));
        assert_eq!(staged_files(dir.path()), 1);

        drop(path);
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_is_read_from_stdout() {
        let dir = tempfile::tempdir().unwrap();
        // `echo` prints its arguments, standing in for an encoder writing to stdout
        let renderer = renderer("echo", dir.path());

        let gif = renderer
            .render(&sample_png(4, 4), &sample_png(4, 4), 64, 64, Duration::from_millis(500))
            .await
            .unwrap();

        assert_eq!(gif.media_type(), MediaType::Gif);
        let text = String::from_utf8_lossy(gif.bytes()).into_owned();
        assert!(text.contains("pipe:1"));
        assert!(text.contains("0.500"));
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_encoder_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer("false", dir.path());

        let err = renderer
            .render(&sample_png(4, 4), &sample_png(4, 4), 64, 64, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, TransitionError::Encoder { .. }));
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_encoder_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer("/nonexistent/restyle-ffmpeg", dir.path());

        let err = renderer
            .render(&sample_png(4, 4), &sample_png(4, 4), 64, 64, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, TransitionError::Spawn { .. }));
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_rejects_zero_duration() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer("ffmpeg", dir.path());

        let err = renderer
            .render(&sample_png(4, 4), &sample_png(4, 4), 64, 64, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::Invalid(_)));
    }
}
