//! Postprocessor chain: which post-download stages run, and in what order.
//!
//! Building a chain is pure. Conflicts between the requested flags and the
//! mode are resolved here and reported back as `ConfigOverride`s so the
//! engine can surface them as events.

use crate::download::options::{DownloadConfiguration, Mode};
use std::fmt;

/// One post-download transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PostprocessorStage {
    /// Cut sponsor segments; video only, always first
    SegmentRemoval,
    StreamMerge,
    SubtitleEmbed,
    AudioExtraction,
    ThumbnailEmbed,
    /// Always last
    MetadataEmbed,
}

/// Stages that may be dropped on encoder failure, least critical first.
const DEGRADATION_ORDER: [PostprocessorStage; 4] = [
    PostprocessorStage::ThumbnailEmbed,
    PostprocessorStage::MetadataEmbed,
    PostprocessorStage::SubtitleEmbed,
    PostprocessorStage::SegmentRemoval,
];

impl PostprocessorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostprocessorStage::SegmentRemoval => "segment-removal",
            PostprocessorStage::StreamMerge => "stream-merge",
            PostprocessorStage::SubtitleEmbed => "subtitle-embed",
            PostprocessorStage::AudioExtraction => "audio-extraction",
            PostprocessorStage::ThumbnailEmbed => "thumbnail-embed",
            PostprocessorStage::MetadataEmbed => "metadata-embed",
        }
    }

    /// Without these stages the output is not what was asked for.
    pub fn is_essential(&self) -> bool {
        matches!(
            self,
            PostprocessorStage::StreamMerge | PostprocessorStage::AudioExtraction
        )
    }

    /// Tags yt-dlp prints in front of this postprocessor's log lines.
    fn log_tags(&self) -> &'static [&'static str] {
        match self {
            PostprocessorStage::SegmentRemoval => &["[SponsorBlock]", "[ModifyChapters]"],
            PostprocessorStage::StreamMerge => &["[Merger]", "[VideoConvertor]", "[VideoRemuxer]"],
            PostprocessorStage::SubtitleEmbed => &["[EmbedSubtitle]", "[FFmpegEmbedSubtitle]"],
            PostprocessorStage::AudioExtraction => &["[ExtractAudio]", "[FFmpegExtractAudio]"],
            PostprocessorStage::ThumbnailEmbed => &["[EmbedThumbnail]", "[ThumbnailsConvertor]"],
            PostprocessorStage::MetadataEmbed => &["[Metadata]", "[FFmpegMetadata]"],
        }
    }
}

impl fmt::Display for PostprocessorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finds the stage whose tag appears last in the backend output, i.e. the
/// one that was running when the encoder gave up.
pub fn detect_failing_stage(diagnostic: &str) -> Option<PostprocessorStage> {
    use PostprocessorStage::*;

    [SegmentRemoval, StreamMerge, SubtitleEmbed, AudioExtraction, ThumbnailEmbed, MetadataEmbed]
        .into_iter()
        .filter_map(|stage| {
            stage
                .log_tags()
                .iter()
                .filter_map(|tag| diagnostic.rfind(tag))
                .max()
                .map(|pos| (pos, stage))
        })
        .max_by_key(|(pos, _)| *pos)
        .map(|(_, stage)| stage)
}

/// Ordered stage list. Invariants: segment removal only in video mode and
/// always first; metadata embedding always last.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PostprocessorChain {
    stages: Vec<PostprocessorStage>,
}

impl PostprocessorChain {
    pub fn stages(&self) -> &[PostprocessorStage] {
        &self.stages
    }

    pub fn contains(&self, stage: PostprocessorStage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Copy of the chain with `stage` removed.
    #[must_use]
    pub fn without(&self, stage: PostprocessorStage) -> Self {
        Self {
            stages: self.stages.iter().copied().filter(|s| *s != stage).collect(),
        }
    }

    /// Least critical stage that can still be dropped.
    pub fn next_degradable(&self) -> Option<PostprocessorStage> {
        DEGRADATION_ORDER.into_iter().find(|s| self.contains(*s))
    }

    /// Number of stages that could ever be dropped from this chain.
    pub fn degradable_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.is_essential()).count()
    }

    /// Stage to drop after an encoder failure: the one named in the output
    /// if it is droppable and present, else the least critical one left.
    pub fn degradation_target(&self, diagnostic: &str) -> Option<PostprocessorStage> {
        detect_failing_stage(diagnostic)
            .filter(|s| !s.is_essential() && self.contains(*s))
            .or_else(|| self.next_degradable())
    }
}

impl fmt::Display for PostprocessorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stages.is_empty() {
            return f.write_str("(none)");
        }
        let names: Vec<_> = self.stages.iter().map(|s| s.as_str()).collect();
        f.write_str(&names.join(" → "))
    }
}

/// A requested setting that was overridden while building the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOverride {
    pub setting: &'static str,
    pub reason: String,
}

/// Result of `build`: the chain plus any overrides applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltChain {
    pub chain: PostprocessorChain,
    pub overrides: Vec<ConfigOverride>,
}

/// Builds the chain for a configuration.
pub fn build(config: &DownloadConfiguration) -> BuiltChain {
    let mut stages = Vec::new();
    let mut overrides = Vec::new();

    match config.mode {
        Mode::Video => {
            if config.sponsor_skip {
                // Cut before merge so the merger sees final timestamps
                stages.push(PostprocessorStage::SegmentRemoval);
            }
            stages.push(PostprocessorStage::StreamMerge);
            if config.embed_subtitles {
                stages.push(PostprocessorStage::SubtitleEmbed);
            }
        }
        Mode::Audio => {
            if config.sponsor_skip {
                overrides.push(ConfigOverride {
                    setting: "sponsor_skip",
                    reason: "segment removal needs a video track; ignored in audio mode".to_string(),
                });
            }
            if config.embed_subtitles {
                log::debug!("Subtitle embedding requested in audio mode, skipping");
            }
            stages.push(PostprocessorStage::AudioExtraction);
        }
    }

    if config.embed_thumbnail {
        stages.push(PostprocessorStage::ThumbnailEmbed);
    }
    if config.embed_metadata {
        stages.push(PostprocessorStage::MetadataEmbed);
    }

    BuiltChain {
        chain: PostprocessorChain { stages },
        overrides,
    }
}
