use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

/// Encoder configuration for the apply pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatConfig {
    pub encoder: &'static str,
    pub extension: String,
    pub bitrate: Option<String>,
}

impl FormatConfig {
    /// Lossless PCM default.
    pub fn wav() -> Self {
        FormatConfig {
            encoder: "pcm_s16le",
            extension: "wav".to_string(),
            bitrate: None,
        }
    }
}

/// Preset name -> (encoder, default extension, default bitrate).
const PRESETS: &[(&str, &str, &str, Option<&str>)] = &[
    ("m4a", "libfdk_aac", "m4a", Some("128K")),
    ("aac", "libfdk_aac", "m4a", Some("128K")),
    ("mp3", "libmp3lame", "mp3", Some("192K")),
    ("opus", "libopus", "opus", Some("128K")),
    ("ogg", "libvorbis", "ogg", Some("160K")),
    ("wav", "pcm_s16le", "wav", None),
    ("flac", "flac", "flac", None),
];

/// Resolve a preset name, optionally carrying a bitrate suffix
/// (`mp3256` selects the mp3 encoder at 256K).
pub fn lookup(preset: &str) -> Result<FormatConfig> {
    for &(name, encoder, extension, bitrate) in PRESETS {
        if preset == name {
            return Ok(FormatConfig {
                encoder,
                extension: extension.to_string(),
                bitrate: bitrate.map(String::from),
            });
        }
        if let Some(rest) = preset.strip_prefix(name) {
            if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
                return Ok(FormatConfig {
                    encoder,
                    extension: extension.to_string(),
                    bitrate: Some(format!("{rest}K")),
                });
            }
        }
    }
    bail!(
        "unknown output format preset '{preset}' \
         (expected one of: m4a, aac, mp3, opus, ogg, wav, flac, \
         optionally with a bitrate suffix like mp3256)"
    )
}

/// Where the normalized copy of `input` goes: `<output_dir>/<stem>.<ext>`,
/// shifting to `<stem>-1.<ext>` when that would overwrite the input itself.
pub fn derive_output_path(input: &Path, output_dir: &Path, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("normalized");
    let candidate = output_dir.join(format!("{stem}.{extension}"));
    if candidate == input {
        output_dir.join(format!("{stem}-1.{extension}"))
    } else {
        candidate
    }
}
