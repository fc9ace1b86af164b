#![forbid(unsafe_code)]

//! The narrow seam between the HTTP handlers and the external extractor.
//!
//! Handlers only ever see [`MediaTool`]; the production implementation runs
//! the `yt-dlp` executable and tests swap in a mock.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{FetchError, FetchResult};
use crate::media::{RawVideoInfo, parse_video_info};
use crate::selector::DownloadPlan;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";
pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Metadata and format list for a single video URL.
    async fn fetch_info(&self, url: &str) -> FetchResult<RawVideoInfo>;

    /// Writes the media selected by `plan` to `output`.
    async fn download(&self, url: &str, plan: &DownloadPlan, output: &Path) -> FetchResult<()>;
}

/// Runs the `yt-dlp` executable as a child process per call.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Runs `yt-dlp --version`; used at startup to fail loudly in the logs
    /// when the executable is missing.
    pub async fn version(&self) -> FetchResult<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| {
                FetchError::Extraction(format!("launching {}: {err}", self.binary.display()))
            })?;
        if !output.status.success() {
            return Err(FetchError::Extraction(failure_message(
                &output.stderr,
                output.status,
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Command preloaded with the flags every invocation shares.
    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("--no-check-certificates")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg("--add-header")
            .arg(format!("User-Agent:{USER_AGENT}"))
            .arg("--add-header")
            .arg(format!("Accept-Language:{ACCEPT_LANGUAGE}"))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl MediaTool for YtDlp {
    async fn fetch_info(&self, url: &str) -> FetchResult<RawVideoInfo> {
        debug!(url, "fetching metadata");
        let output = self
            .command()
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--prefer-free-formats")
            .arg("--")
            .arg(url)
            .output()
            .await
            .map_err(|err| {
                FetchError::Extraction(format!("launching {}: {err}", self.binary.display()))
            })?;

        if !output.status.success() {
            let message = failure_message(&output.stderr, output.status);
            warn!(url, %message, "metadata command failed");
            return Err(FetchError::Extraction(message));
        }

        parse_video_info(&output.stdout)
    }

    async fn download(&self, url: &str, plan: &DownloadPlan, output: &Path) -> FetchResult<()> {
        let mut command = self.command();
        command
            .arg("--format")
            .arg(&plan.selector)
            .arg("--output")
            .arg(escape_output_template(output))
            .arg("--newline");
        if let Some(audio_format) = &plan.extract_audio {
            command
                .arg("--extract-audio")
                .arg("--audio-format")
                .arg(audio_format);
        }
        command
            .arg("--")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(url, selector = %plan.selector, audio = ?plan.extract_audio, output = %output.display(), "starting download");
        let mut child = command.spawn().map_err(|err| {
            FetchError::Download(format!("launching {}: {err}", self.binary.display()))
        })?;

        // stderr is drained on its own task so a chatty child never blocks on
        // a full pipe while we are still reading stdout.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                buf
            })
        });

        if let Some(stdout) = child.stdout.take() {
            // Drained to EOF even when a line is not valid UTF-8.
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            let mut last_reported: Option<u32> = None;
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(url, "reading yt-dlp output: {err}");
                        break;
                    }
                }
                let line = String::from_utf8_lossy(&buf);
                if let Some(percent) = parse_progress(&line) {
                    let whole = percent.floor() as u32;
                    if last_reported != Some(whole) {
                        last_reported = Some(whole);
                        debug!(url, "downloaded {percent:.1}%");
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|err| FetchError::Download(format!("waiting for yt-dlp: {err}")))?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if !status.success() {
            let message = failure_message(&stderr, status);
            warn!(url, %message, "download command failed");
            return Err(FetchError::Download(message));
        }

        info!(url, output = %output.display(), "download finished");
        Ok(())
    }
}

/// Reads the percentage out of a `[download]  42.3% of ...` line.
pub fn parse_progress(line: &str) -> Option<f32> {
    let rest = line.trim().strip_prefix("[download]")?;
    rest.split_whitespace()
        .find_map(|token| token.strip_suffix('%'))
        .and_then(|value| value.parse::<f32>().ok())
        .filter(|value| (0.0..=100.0).contains(value))
}

/// yt-dlp treats `%` in `--output` as a template marker.
fn escape_output_template(path: &Path) -> String {
    path.to_string_lossy().replace('%', "%%")
}

fn failure_message(stderr: &[u8], status: std::process::ExitStatus) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        format!("yt-dlp exited with {status}")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_progress_reads_percentages() {
        assert_eq!(
            parse_progress("[download]  42.3% of   10.00MiB at    1.00MiB/s ETA 00:05"),
            Some(42.3)
        );
        assert_eq!(parse_progress("[download] 100% of 3.93MiB in 00:00:02"), Some(100.0));
        assert_eq!(parse_progress("[download] Destination: /tmp/a.mp4"), None);
        assert_eq!(parse_progress("[youtube] abc: Downloading webpage"), None);
    }

    #[test]
    fn output_template_escapes_percent() {
        assert_eq!(
            escape_output_template(Path::new("/tmp/100%/a.mp4")),
            "/tmp/100%%/a.mp4"
        );
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Fake yt-dlp: records its argv, prints metadata for `--dump-single-json`,
        /// writes a small file to `--output` otherwise, and fails for URLs
        /// containing `broken`. URLs containing `latin1` get a non-UTF-8 line
        /// followed by a burst of progress output.
        fn install_stub(dir: &Path) -> PathBuf {
            let script_path = dir.join("yt-dlp");
            let script = r#"#!/usr/bin/env bash
set -eu
printf '%s\n' "$@" > "$(dirname "$0")/args.txt"
output=""
dump=0
url=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    --output) shift; output="$1" ;;
    --dump-single-json) dump=1 ;;
    --version) echo "2025.01.01"; exit 0 ;;
    --format|--audio-format|--add-header) shift ;;
    --) url="${2:-}"; break ;;
    -*) ;;
    *) url="$1" ;;
  esac
  shift
done
if [[ "$url" == *broken* ]]; then
  echo "ERROR: [generic] Unsupported URL: $url" >&2
  exit 1
fi
if [[ $dump -eq 1 ]]; then
  echo '{"title":"Stub Title","uploader":"Stub","duration":10,"formats":[{"format_id":"18","ext":"mp4","height":360,"vcodec":"avc1","acodec":"mp4a"}]}'
  exit 0
fi
echo "[download] Destination: $output"
if [[ "$url" == *latin1* ]]; then
  printf '[download] Titre \xe9t\xe9\n'
  for i in $(seq 1 2000); do echo "[download]  $((i % 100)).0% of 10B"; done
fi
echo "[download]  50.0% of 10B"
echo "[download] 100.0% of 10B"
printf 'media-bytes' > "$output"
"#;
            fs::write(&script_path, script).unwrap();
            let mut perms = fs::metadata(&script_path).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms).unwrap();
            script_path
        }

        fn recorded_args(dir: &TempDir) -> Vec<String> {
            fs::read_to_string(dir.path().join("args.txt"))
                .unwrap()
                .lines()
                .map(str::to_owned)
                .collect()
        }

        #[tokio::test]
        async fn fetch_info_parses_stub_output() {
            let dir = tempfile::tempdir().unwrap();
            let tool = YtDlp::new(install_stub(dir.path()));
            let info = tool.fetch_info("https://example.com/watch?v=ABC").await.unwrap();
            assert_eq!(info.title(), Some("Stub Title"));
            assert_eq!(info.formats().len(), 1);

            let args = recorded_args(&dir);
            assert!(args.contains(&"--dump-single-json".to_string()));
            assert!(args.contains(&format!("User-Agent:{USER_AGENT}")));
            assert!(args.contains(&format!("Accept-Language:{ACCEPT_LANGUAGE}")));
        }

        #[tokio::test]
        async fn fetch_info_failure_carries_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let tool = YtDlp::new(install_stub(dir.path()));
            let err = tool.fetch_info("https://broken.example").await.unwrap_err();
            match err {
                FetchError::Extraction(message) => assert!(message.contains("Unsupported URL")),
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn download_writes_output_with_video_selector() {
            let dir = tempfile::tempdir().unwrap();
            let tool = YtDlp::new(install_stub(dir.path()));
            let output = dir.path().join("Title_1.mp4");
            let plan = DownloadPlan::build(Some("720p"), "mp4");
            tool.download("https://example.com/watch?v=ABC", &plan, &output)
                .await
                .unwrap();

            assert_eq!(fs::read(&output).unwrap(), b"media-bytes");
            let args = recorded_args(&dir);
            let format_pos = args.iter().position(|arg| arg == "--format").unwrap();
            assert_eq!(
                args[format_pos + 1],
                "best[height<=720][ext=mp4]/best[height<=720]"
            );
            assert!(!args.contains(&"--extract-audio".to_string()));
        }

        #[tokio::test]
        async fn download_audio_passes_extraction_flags() {
            let dir = tempfile::tempdir().unwrap();
            let tool = YtDlp::new(install_stub(dir.path()));
            let output = dir.path().join("Title_1.mp3");
            let plan = DownloadPlan::build(None, "mp3");
            tool.download("https://example.com/watch?v=ABC", &plan, &output)
                .await
                .unwrap();

            let args = recorded_args(&dir);
            assert!(args.contains(&"--extract-audio".to_string()));
            let audio_pos = args.iter().position(|arg| arg == "--audio-format").unwrap();
            assert_eq!(args[audio_pos + 1], "mp3");
            let format_pos = args.iter().position(|arg| arg == "--format").unwrap();
            assert_eq!(args[format_pos + 1], "bestaudio");
        }

        #[tokio::test]
        async fn download_failure_is_download_error() {
            let dir = tempfile::tempdir().unwrap();
            let tool = YtDlp::new(install_stub(dir.path()));
            let output = dir.path().join("x.mp4");
            let plan = DownloadPlan::build(None, "mp4");
            let err = tool
                .download("https://broken.example", &plan, &output)
                .await
                .unwrap_err();
            assert!(matches!(err, FetchError::Download(ref msg) if msg.contains("Unsupported URL")));
        }

        #[tokio::test]
        async fn url_follows_option_terminator() {
            let dir = tempfile::tempdir().unwrap();
            let tool = YtDlp::new(install_stub(dir.path()));
            let info = tool.fetch_info("--version").await.unwrap();
            assert_eq!(info.title(), Some("Stub Title"));
            let args = recorded_args(&dir);
            assert_eq!(&args[args.len() - 2..], ["--", "--version"]);

            let output = dir.path().join("Title_1.mp4");
            let plan = DownloadPlan::build(None, "mp4");
            tool.download("-x", &plan, &output).await.unwrap();
            let args = recorded_args(&dir);
            assert_eq!(&args[args.len() - 2..], ["--", "-x"]);
        }

        #[tokio::test]
        async fn download_survives_non_utf8_output() {
            let dir = tempfile::tempdir().unwrap();
            let tool = YtDlp::new(install_stub(dir.path()));
            let output = dir.path().join("Title_1.mp4");
            let plan = DownloadPlan::build(None, "mp4");
            tool.download("https://latin1.example/v", &plan, &output)
                .await
                .unwrap();
            assert_eq!(fs::read(&output).unwrap(), b"media-bytes");
        }

        #[tokio::test]
        async fn version_reads_stub() {
            let dir = tempfile::tempdir().unwrap();
            let tool = YtDlp::new(install_stub(dir.path()));
            assert_eq!(tool.version().await.unwrap(), "2025.01.01");
        }

        #[tokio::test]
        async fn missing_binary_is_reported() {
            let tool = YtDlp::new("/nonexistent/yt-dlp");
            let err = tool.fetch_info("https://example.com").await.unwrap_err();
            assert!(matches!(err, FetchError::Extraction(ref msg) if msg.contains("launching")));
        }
    }
}
