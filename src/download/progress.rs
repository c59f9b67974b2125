//! Parser for yt-dlp `--newline` progress lines.

use crate::download::backend::ProgressUpdate;

/// Parses a line like
/// `[download]  45.2% of ~10.00MiB at  500.00KiB/s ETA 00:10`.
///
/// Returns `None` for every other output line (destination notices,
/// postprocessor output, warnings).
pub fn parse_progress(line: &str) -> Option<ProgressUpdate> {
    if !line.contains("[download]") || !line.contains('%') {
        return None;
    }

    let mut update = ProgressUpdate::default();
    let parts: Vec<&str> = line.split_whitespace().collect();

    for (i, part) in parts.iter().enumerate() {
        let next = parts.get(i + 1).copied();
        match *part {
            p if p.ends_with('%') => {
                if let Ok(value) = p.trim_end_matches('%').parse::<f32>() {
                    // Garbage above 100 must not read as finished
                    update.percent = Some(value.clamp(0.0, 100.0));
                }
            }
            "of" => update.total_bytes = next.and_then(parse_size),
            "at" => update.speed_bytes_sec = next.and_then(parse_size).map(|b| b as f64),
            "ETA" => update.eta_seconds = next.and_then(parse_eta),
            _ => {}
        }
    }

    update.percent?;

    if let (Some(percent), Some(total)) = (update.percent, update.total_bytes) {
        update.downloaded_bytes = Some((f64::from(percent) / 100.0 * total as f64) as u64);
    }

    Some(update)
}

/// Parses "10.00MiB", "~1.2GiB", "500.00KiB/s", "812B".
fn parse_size(size_str: &str) -> Option<u64> {
    let size_str = size_str.trim_start_matches('~').trim_end_matches("/s");

    let (number, multiplier) = if let Some(n) = size_str.strip_suffix("GiB") {
        (n, 1024.0 * 1024.0 * 1024.0)
    } else if let Some(n) = size_str.strip_suffix("MiB") {
        (n, 1024.0 * 1024.0)
    } else if let Some(n) = size_str.strip_suffix("KiB") {
        (n, 1024.0)
    } else if let Some(n) = size_str.strip_suffix('B') {
        (n, 1.0)
    } else {
        return None;
    };

    number.parse::<f64>().ok().map(|v| (v * multiplier) as u64)
}

/// Parses "00:10", "1:23" or "1:02:03".
fn parse_eta(eta_str: &str) -> Option<u64> {
    eta_str
        .split(':')
        .map(|p| p.parse::<u64>().ok())
        .try_fold((0u64, 0usize), |(acc, n), part| part.map(|v| (acc * 60 + v, n + 1)))
        .filter(|(_, n)| (2..=3).contains(n))
        .map(|(secs, _)| secs)
}
