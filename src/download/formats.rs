//! Format ladders: selector expressions from strict to permissive.

use crate::download::options::{Mode, QualityTier};

/// One rung of the ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatLayer {
    /// 1-based position, 1 = most preferred
    pub rank: usize,
    /// Selector understood by the backend (`-f`)
    pub selector: String,
    pub label: String,
    pub max_height: Option<u32>,
}

/// Video ladder for a tier, highest preference first.
///
/// Always five layers: compatible MP4+M4A, H.264+AAC, any split streams,
/// progressive single file, then anything at all. Every rung of a capped
/// tier stays under the cap.
pub fn list_format_layers(tier: QualityTier) -> Vec<FormatLayer> {
    let cap = tier.max_height();
    let filt = cap.map(|h| format!("[height<={h}]")).unwrap_or_default();
    let suffix = cap.map(|h| format!(" ≤{h}p")).unwrap_or_default();

    let rungs = [
        (
            format!("bestvideo{filt}[ext=mp4]+bestaudio[ext=m4a]/best{filt}[ext=mp4]"),
            format!("MP4 + M4A{suffix}"),
        ),
        (
            format!("bestvideo{filt}[vcodec^=avc1]+bestaudio[acodec^=mp4a]"),
            format!("H.264 + AAC{suffix}"),
        ),
        (format!("bestvideo{filt}+bestaudio"), format!("Any video + audio{suffix}")),
        (format!("best{filt}"), format!("Single file{suffix}")),
        match cap {
            // `*` accepts any stream mix, so only the height filter can reject
            Some(_) => (format!("bestvideo*{filt}+bestaudio/best*{filt}"), format!("Anything{suffix}")),
            None => ("best".to_string(), "Any available".to_string()),
        },
    ];

    rungs
        .into_iter()
        .enumerate()
        .map(|(i, (selector, label))| FormatLayer {
            rank: i + 1,
            selector,
            label,
            max_height: cap,
        })
        .collect()
}

/// Audio-only ladder.
pub fn list_audio_layers() -> Vec<FormatLayer> {
    [
        ("bestaudio[ext=m4a]", "M4A audio"),
        ("bestaudio[acodec=opus]", "Opus audio"),
        ("bestaudio", "Any audio"),
        ("best", "Any available (extract audio)"),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, (selector, label))| FormatLayer {
        rank: i + 1,
        selector: selector.to_string(),
        label: label.to_string(),
        max_height: None,
    })
    .collect()
}

/// Ladder matching a mode/tier pair.
pub fn layers_for(mode: Mode, tier: QualityTier) -> Vec<FormatLayer> {
    match mode {
        Mode::Video => list_format_layers(tier),
        Mode::Audio => list_audio_layers(),
    }
}
