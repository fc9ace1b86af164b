#![forbid(unsafe_code)]

//! Typed views of the extractor output and the API payloads built from it.
//!
//! yt-dlp emits a very loose JSON document where almost any field may be
//! missing, `null`, a string, or a list. The `Raw*` structs accept all of
//! that; the conversions at the bottom decide what is required and fail with
//! [`FetchError::MalformedResponse`] instead of passing untyped data on.

use serde::{Deserialize, Serialize};

use crate::error::{FetchError, FetchResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn iter(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            OneOrMany::One(value) => Box::new(std::iter::once(value)),
            OneOrMany::Many(values) => Box::new(values.iter()),
        }
    }
}

/// Uploader/channel entries show up either as plain names or as objects.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CreatorInfo {
    Name(String),
    Object {
        name: Option<String>,
        title: Option<String>,
    },
}

impl CreatorInfo {
    pub fn name(&self) -> Option<&str> {
        match self {
            CreatorInfo::Name(value) => Some(value.as_str()),
            CreatorInfo::Object { name, title } => name.as_deref().or(title.as_deref()),
        }
    }
}

/// Subset of `yt-dlp --dump-single-json`. Everything is optional because
/// extractors for different sites fill in different fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVideoInfo {
    pub title: Option<String>,
    pub fulltitle: Option<String>,
    pub uploader: Option<OneOrMany<CreatorInfo>>,
    pub channel: Option<OneOrMany<CreatorInfo>>,
    #[serde(default)]
    pub creators: Option<Vec<CreatorInfo>>,
    pub duration: Option<f64>,
    pub view_count: Option<i64>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub thumbnails: Option<Vec<RawThumbnail>>,
    #[serde(default)]
    pub formats: Option<Vec<RawFormat>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawThumbnail {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub format_note: Option<String>,
    pub ext: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    /// Total bitrate in kbit/s.
    pub tbr: Option<f64>,
    pub filesize: Option<i64>,
    pub filesize_approx: Option<f64>,
    pub url: Option<String>,
}

impl RawFormat {
    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }

    /// `720p` when the height is known, otherwise whatever yt-dlp calls it.
    pub fn quality_label(&self) -> Option<String> {
        height_label(self.height)
            .or_else(|| non_empty(self.format_note.as_deref()).map(str::to_owned))
            .or_else(|| non_empty(self.format_id.as_deref()).map(str::to_owned))
    }

    /// Exact size when reported, else the estimate.
    pub fn size_bytes(&self) -> Option<u64> {
        self.filesize
            .and_then(|size| u64::try_from(size).ok())
            .or_else(|| {
                self.filesize_approx
                    .filter(|size| size.is_finite() && *size >= 0.0)
                    .map(|size| size as u64)
            })
    }
}

impl RawVideoInfo {
    pub fn title(&self) -> Option<&str> {
        non_empty(self.title.as_deref()).or_else(|| non_empty(self.fulltitle.as_deref()))
    }

    pub fn author(&self) -> Option<&str> {
        let uploader = self.uploader.iter().flat_map(|value| value.iter());
        let channel = self.channel.iter().flat_map(|value| value.iter());
        let creators = self.creators.iter().flatten();
        uploader
            .chain(channel)
            .chain(creators)
            .find_map(|creator| non_empty(creator.name()))
    }

    /// Prefers the top-level thumbnail; yt-dlp sorts `thumbnails` by
    /// preference so the last entry is the best one.
    pub fn thumbnail_url(&self) -> Option<&str> {
        non_empty(self.thumbnail.as_deref()).or_else(|| {
            self.thumbnails
                .as_deref()
                .unwrap_or_default()
                .iter()
                .rev()
                .find_map(|thumb| non_empty(thumb.url.as_deref()))
        })
    }

    pub fn formats(&self) -> &[RawFormat] {
        self.formats.as_deref().unwrap_or_default()
    }
}

/// Payload of `GET /api/video-info`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub title: String,
    pub author: Option<String>,
    pub length_seconds: i64,
    pub view_count: i64,
    pub thumbnail: Option<String>,
    pub formats: Vec<Format>,
    pub available_qualities: Vec<String>,
}

/// One playable/downloadable variant of a video.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Format {
    pub format_id: String,
    pub quality: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcodec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acodec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Items of `GET /api/formats`; only formats carrying audio and video.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatSummary {
    pub format_id: String,
    pub quality: Option<String>,
    pub container: Option<String>,
    pub size: Option<u64>,
}

/// Body of `POST /api/download`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

/// Successful response of `POST /api/download`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
    pub success: bool,
    pub filename: String,
    pub download_url: String,
    pub size: u64,
}

/// Decodes the raw stdout of a metadata call.
pub fn parse_video_info(raw: &[u8]) -> FetchResult<RawVideoInfo> {
    serde_json::from_slice(raw).map_err(|err| FetchError::MalformedResponse(err.to_string()))
}

impl TryFrom<&RawVideoInfo> for VideoInfo {
    type Error = FetchError;

    fn try_from(raw: &RawVideoInfo) -> FetchResult<Self> {
        let title = raw
            .title()
            .ok_or_else(|| FetchError::MalformedResponse("missing video title".into()))?
            .to_string();

        let video: Vec<&RawFormat> = raw
            .formats()
            .iter()
            .filter(|format| format.has_video())
            .filter(|format| non_empty(format.format_id.as_deref()).is_some())
            .collect();
        let formats = video.iter().copied().filter_map(build_format).collect();

        Ok(Self {
            title,
            author: raw.author().map(str::to_owned),
            length_seconds: raw
                .duration
                .filter(|value| value.is_finite() && *value >= 0.0)
                .map(|value| value.trunc() as i64)
                .unwrap_or(0),
            view_count: raw.view_count.unwrap_or(0).max(0),
            thumbnail: raw.thumbnail_url().map(str::to_owned),
            formats,
            available_qualities: available_qualities(video),
        })
    }
}

fn build_format(raw: &RawFormat) -> Option<Format> {
    let format_id = non_empty(raw.format_id.as_deref())?.to_string();
    Some(Format {
        quality: raw.quality_label().unwrap_or_else(|| format_id.clone()),
        format_id,
        ext: raw.ext.clone(),
        vcodec: raw.vcodec.clone(),
        acodec: raw.acodec.clone(),
        bitrate: raw.tbr,
        filesize: raw.size_bytes(),
        fps: raw.fps,
        url: raw.url.clone(),
    })
}

/// Distinct `<height>p` labels of every format with a video stream, tallest
/// first. Formats without a height do not contribute.
pub fn available_qualities<'a>(formats: impl IntoIterator<Item = &'a RawFormat>) -> Vec<String> {
    let mut heights: Vec<i64> = formats
        .into_iter()
        .filter(|format| format.has_video())
        .filter_map(|format| format.height)
        .filter(|height| *height > 0)
        .collect();
    heights.sort_unstable_by(|a, b| b.cmp(a));
    heights.dedup();
    heights.into_iter().map(|height| format!("{height}p")).collect()
}

pub fn format_summaries(raw: &RawVideoInfo) -> Vec<FormatSummary> {
    raw.formats()
        .iter()
        .filter(|format| format.has_video() && format.has_audio())
        .filter_map(|format| {
            let format_id = non_empty(format.format_id.as_deref())?.to_string();
            Some(FormatSummary {
                format_id,
                quality: format.quality_label(),
                container: format.ext.clone(),
                size: format.size_bytes(),
            })
        })
        .collect()
}

fn height_label(height: Option<i64>) -> Option<String> {
    height.filter(|h| *h > 0).map(|h| format!("{h}p"))
}

fn codec_present(codec: Option<&str>) -> bool {
    matches!(codec.map(str::trim), Some(value) if !value.is_empty() && value != "none")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
