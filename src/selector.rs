#![forbid(unsafe_code)]

//! Maps the quality/format pair picked in the UI onto a yt-dlp format
//! selector expression.

/// Extensions that switch the download into audio extraction.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a"];

pub const DEFAULT_EXTENSION: &str = "mp4";

/// What the collaborator is asked to fetch for one download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    /// Format selector, e.g. `best[height<=720][ext=mp4]/best[height<=720]`.
    pub selector: String,
    /// Target audio codec when only the audio track should be kept.
    pub extract_audio: Option<String>,
}

impl DownloadPlan {
    /// Builds the plan for a requested quality label and file extension.
    ///
    /// * audio extensions always take the best audio stream and extract it;
    /// * `None`, blank or `best` quality picks the best muxed format;
    /// * `720p` / `720` caps the height, preferring the requested container;
    /// * anything else is treated as an explicit format id.
    pub fn build(quality: Option<&str>, ext: &str) -> Self {
        if is_audio_extension(ext) {
            return Self {
                selector: "bestaudio".to_string(),
                extract_audio: Some(ext.to_ascii_lowercase()),
            };
        }

        let quality = quality.map(str::trim).filter(|value| !value.is_empty());
        let selector = match quality {
            None => best_in_container(ext),
            Some(value) if value.eq_ignore_ascii_case("best") => best_in_container(ext),
            Some(value) => match parse_height(value) {
                Some(height) => format!("best[height<={height}][ext={ext}]/best[height<={height}]"),
                None => value.to_string(),
            },
        };

        Self {
            selector,
            extract_audio: None,
        }
    }

    pub fn is_audio_only(&self) -> bool {
        self.extract_audio.is_some()
    }
}

pub fn is_audio_extension(ext: &str) -> bool {
    AUDIO_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

fn best_in_container(ext: &str) -> String {
    format!("best[ext={ext}]/best")
}

/// Accepts `720p`, `720P` and bare `720`.
fn parse_height(value: &str) -> Option<u32> {
    let digits = value
        .strip_suffix('p')
        .or_else(|| value.strip_suffix('P'))
        .unwrap_or(value);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_label_caps_resolution_in_container() {
        let plan = DownloadPlan::build(Some("720p"), "mp4");
        assert_eq!(plan.selector, "best[height<=720][ext=mp4]/best[height<=720]");
        assert!(!plan.is_audio_only());
    }

    #[test]
    fn bare_height_is_accepted() {
        let plan = DownloadPlan::build(Some("1080"), "webm");
        assert_eq!(
            plan.selector,
            "best[height<=1080][ext=webm]/best[height<=1080]"
        );
    }

    #[test]
    fn missing_or_best_quality_picks_best() {
        assert_eq!(DownloadPlan::build(None, "mp4").selector, "best[ext=mp4]/best");
        assert_eq!(DownloadPlan::build(Some("  "), "mp4").selector, "best[ext=mp4]/best");
        assert_eq!(DownloadPlan::build(Some("BEST"), "mp4").selector, "best[ext=mp4]/best");
    }

    #[test]
    fn unknown_quality_is_an_exact_format_id() {
        let plan = DownloadPlan::build(Some("137+140"), "mp4");
        assert_eq!(plan.selector, "137+140");
    }

    #[test]
    fn audio_extensions_extract_audio() {
        for ext in ["mp3", "m4a", "MP3"] {
            let plan = DownloadPlan::build(Some("720p"), ext);
            assert_eq!(plan.selector, "bestaudio");
            assert_eq!(plan.extract_audio.as_deref(), Some(ext.to_ascii_lowercase().as_str()));
        }
    }

    #[test]
    fn parse_height_rejects_garbage() {
        assert_eq!(parse_height("p"), None);
        assert_eq!(parse_height("720p60"), None);
        assert_eq!(parse_height("hd"), None);
        assert_eq!(parse_height("480P"), Some(480));
    }
}
