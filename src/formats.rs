//! Turns the raw format list reported by yt-dlp into the short, ranked set of
//! choices a client can pick from.
//!
//! Only muxable video streams in the target container survive. Entries are
//! labelled by resolution, deduplicated on `(label, extension)`, sorted from the
//! tallest picture down and capped. When nothing usable remains a fixed preset
//! list is returned instead so the client always has something to select.

use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Container accepted for video choices.
pub const TARGET_CONTAINER: &str = "mp4";
/// Streams shorter than this many pixels are never offered.
pub const MIN_HEIGHT: i64 = 144;
pub const MAX_CHOICES: usize = 15;

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("static regex compiles"));

/// One entry of yt-dlp's `formats` array. Every field is optional because
/// extractors report wildly different subsets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatDescriptor {
    pub format_id: Option<String>,
    pub format_note: Option<String>,
    /// yt-dlp reports this as a number, some extractors as a string.
    pub quality: Option<Value>,
    #[serde(default, deserialize_with = "lenient_integer")]
    pub width: Option<i64>,
    #[serde(default, deserialize_with = "lenient_integer")]
    pub height: Option<i64>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    #[serde(default, deserialize_with = "lenient_integer")]
    pub filesize: Option<i64>,
    #[serde(default, deserialize_with = "lenient_integer")]
    pub filesize_approx: Option<i64>,
}

/// Accepts integers, fractional numbers (truncated) and numeric strings.
/// Anything else decodes as `None` so one odd field cannot reject the entry.
fn lenient_integer<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|n| n.is_finite()).map(|n| n as i64)),
        Some(Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(|n| n as i64),
        _ => None,
    })
}

/// User facing format option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatChoice {
    pub format_id: String,
    #[serde(rename = "ext")]
    pub extension: String,
    #[serde(rename = "resolution")]
    pub resolution_label: String,
    #[serde(rename = "filesize", skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
    #[serde(rename = "vcodec", skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(rename = "acodec", skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
}

impl FormatDescriptor {
    fn extension(&self) -> &str {
        self.ext.as_deref().unwrap_or(TARGET_CONTAINER)
    }

    fn has_video(&self) -> bool {
        self.vcodec
            .as_deref()
            .is_some_and(|codec| !codec.is_empty() && !codec.eq_ignore_ascii_case("none"))
    }

    fn known_height(&self) -> Option<i64> {
        self.height.filter(|height| *height > 0)
    }

    /// `WxH` when both dimensions are known, `Hp` with only a height, otherwise
    /// whatever free text the extractor attached.
    pub fn resolution_label(&self) -> String {
        let width = self.width.filter(|width| *width > 0);
        match (width, self.known_height()) {
            (Some(width), Some(height)) => format!("{width}x{height}"),
            (None, Some(height)) => format!("{height}p"),
            _ => self
                .format_note
                .as_deref()
                .filter(|note| !note.is_empty())
                .map(str::to_owned)
                .or_else(|| self.quality.as_ref().and_then(quality_text))
                .unwrap_or_else(|| "unknown".to_owned()),
        }
    }

    fn to_choice(&self, resolution_label: String) -> FormatChoice {
        FormatChoice {
            format_id: self.format_id.clone().unwrap_or_default(),
            extension: self.extension().to_owned(),
            resolution_label,
            size_bytes: self.filesize.or(self.filesize_approx),
            video_codec: self.vcodec.clone(),
            audio_codec: self.acodec.clone(),
        }
    }
}

fn quality_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Builds the ranked choice list for one metadata request.
pub fn normalize(raw_formats: &[FormatDescriptor]) -> Vec<FormatChoice> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut choices = Vec::new();

    for descriptor in raw_formats {
        if !descriptor.has_video() || !descriptor.extension().eq_ignore_ascii_case(TARGET_CONTAINER)
        {
            continue;
        }

        let label = descriptor.resolution_label();
        if !seen.insert((label.clone(), descriptor.extension().to_owned())) {
            continue;
        }

        if descriptor
            .known_height()
            .is_some_and(|height| height < MIN_HEIGHT)
        {
            continue;
        }

        choices.push(descriptor.to_choice(label));
    }

    if choices.is_empty() {
        return fallback_choices();
    }

    choices.sort_by_key(|choice| std::cmp::Reverse(resolution_rank(&choice.resolution_label)));
    choices.truncate(MAX_CHOICES);
    choices
}

/// Sort key pulled out of a label: the height of a `WxH` pair, otherwise the
/// first number present, otherwise zero.
pub fn resolution_rank(label: &str) -> u64 {
    let numbers: Vec<u64> = NUMBER_RE
        .find_iter(label)
        .filter_map(|found| found.as_str().parse().ok())
        .collect();
    if label.contains('x') && numbers.len() >= 2 {
        return numbers[1];
    }
    numbers.first().copied().unwrap_or(0)
}

/// Preset options offered when the extractor reported nothing usable.
pub fn fallback_choices() -> Vec<FormatChoice> {
    [
        ("bestvideo", "Best Quality"),
        ("137", "1080p"),
        ("136", "720p"),
        ("135", "480p"),
        ("134", "360p"),
    ]
    .into_iter()
    .map(|(format_id, label)| FormatChoice {
        format_id: format_id.to_owned(),
        extension: TARGET_CONTAINER.to_owned(),
        resolution_label: label.to_owned(),
        size_bytes: None,
        video_codec: None,
        audio_codec: None,
    })
    .collect()
}
