//! Classification of backend failures.
//!
//! The backend's failure signals are stringly-typed (exit codes, exception
//! text, log lines). They are matched against an ordered rule table, first
//! match wins, with `Unknown` as the fallback. New signatures are added as
//! rows, not as new branches.

use crate::download::backend::BackendFailure;
use regex::Regex;
use std::fmt;

/// Typed failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Requested format/extraction path does not work for this reference
    FormatUnavailable,
    /// Encoder (ffmpeg) failed inside a postprocessor stage
    EncodingFailure,
    /// Remote service throttled us
    RateLimited,
    /// Cookies/login needed or invalid
    AuthRequired,
    /// Anything unrecognized
    Unknown,
}

impl ErrorKind {
    /// Whether the request can continue after this kind of failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::AuthRequired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FormatUnavailable => "format_unavailable",
            ErrorKind::EncodingFailure => "encoding_failure",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::AuthRequired => "auth_required",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Message for end users (CLI output).
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::FormatUnavailable => "No usable format: every format/client combination was rejected.",
            ErrorKind::EncodingFailure => "FFmpeg failed while post-processing the download.",
            ErrorKind::RateLimited => "The server is rate limiting requests. Try again later.",
            ErrorKind::AuthRequired => {
                "Authentication required: pass a Netscape cookies file (--cookies-file) or a browser (--cookies-browser)."
            }
            ErrorKind::Unknown => "Download failed. Check the link and the log for details.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(kind, retryable)` pair produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub retryable: bool,
}

impl Classification {
    fn of(kind: ErrorKind) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
        }
    }
}

/// What a rule looks at.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exact process exit code
    ExitCode(i32),
    /// Case-insensitive substring of the diagnostic text
    Contains(&'static str),
    /// Regular expression over the diagnostic text
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, failure: &BackendFailure, lowered: &str) -> bool {
        match self {
            Matcher::ExitCode(code) => failure.exit_code == Some(*code),
            Matcher::Contains(needle) => lowered.contains(needle),
            Matcher::Pattern(re) => re.is_match(&failure.message),
        }
    }
}

/// One row of the table.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub name: &'static str,
    pub kind: ErrorKind,
    pub matcher: Matcher,
}

impl ClassificationRule {
    pub fn exit_code(name: &'static str, kind: ErrorKind, code: i32) -> Self {
        Self {
            name,
            kind,
            matcher: Matcher::ExitCode(code),
        }
    }

    /// `needle` must be lowercase.
    pub fn contains(name: &'static str, kind: ErrorKind, needle: &'static str) -> Self {
        Self {
            name,
            kind,
            matcher: Matcher::Contains(needle),
        }
    }

    pub fn pattern(name: &'static str, kind: ErrorKind, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            kind,
            matcher: Matcher::Pattern(Regex::new(pattern)?),
        })
    }
}

/// Built-in table, in precedence order.
pub fn default_rules() -> Vec<ClassificationRule> {
    use ErrorKind::*;

    vec![
        // 1. Encoder exit codes: AVERROR(EINVAL), AVERROR_INVALIDDATA
        ClassificationRule::exit_code("ffmpeg_einval", EncodingFailure, -22),
        ClassificationRule::exit_code("ffmpeg_invalid_data", EncodingFailure, -1_094_995_529),
        ClassificationRule::contains("postprocessing_error", EncodingFailure, "postprocessing:"),
        ClassificationRule::contains("ffmpeg_exit", EncodingFailure, "ffmpeg exited with code"),
        ClassificationRule::contains("conversion_failed", EncodingFailure, "conversion failed"),
        // 2. Rate limiting
        ClassificationRule::contains("rate_limited", RateLimited, "rate-limited"),
        ClassificationRule::contains("rate_limit", RateLimited, "rate limit"),
        ClassificationRule::contains("http_429", RateLimited, "http error 429"),
        ClassificationRule::contains("too_many_requests", RateLimited, "too many requests"),
        // 3. Format unavailable for this reference
        ClassificationRule::contains("format_not_available", FormatUnavailable, "requested format is not available"),
        ClassificationRule::contains("no_formats", FormatUnavailable, "no video formats found"),
        ClassificationRule::contains("signature", FormatUnavailable, "signature"),
        ClassificationRule::contains("nsig", FormatUnavailable, "nsig extraction failed"),
        ClassificationRule::contains("not_available", FormatUnavailable, "not available"),
        // 4. Authentication / cookies
        ClassificationRule::contains("cookie_format", AuthRequired, "netscape format"),
        ClassificationRule::contains("cookies_invalid", AuthRequired, "cookies are no longer valid"),
        ClassificationRule::contains("sign_in", AuthRequired, "sign in to confirm"),
        ClassificationRule::contains("login_required", AuthRequired, "login required"),
        ClassificationRule::contains("use_cookies", AuthRequired, "use --cookies"),
        ClassificationRule::contains("private_video", AuthRequired, "private video"),
        ClassificationRule::contains("members_only", AuthRequired, "members-only"),
    ]
}

/// Ordered rule table with an implicit `Unknown` fallback.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassificationRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl Classifier {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// Adds a rule that takes precedence over every existing one.
    #[must_use]
    pub fn with_priority_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// Adds a rule evaluated after every existing one.
    #[must_use]
    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// First matching rule, if any.
    pub fn matching_rule(&self, failure: &BackendFailure) -> Option<&ClassificationRule> {
        let lowered = failure.message.to_lowercase();
        self.rules.iter().find(|rule| rule.matcher.matches(failure, &lowered))
    }

    /// Never fails: unmatched input is `Unknown` (retryable).
    pub fn classify(&self, failure: &BackendFailure) -> Classification {
        match self.matching_rule(failure) {
            Some(rule) => {
                log::debug!("Failure matched rule '{}' -> {}", rule.name, rule.kind);
                Classification::of(rule.kind)
            }
            None => Classification::of(ErrorKind::Unknown),
        }
    }
}
