//! Subtitle file parsing.
//!
//! Two inputs are accepted: SRT files and a JSON word-timing document of the
//! form `[{"text": "...", "start": 0.0, "end": 0.4}, ...]`.

use serde::Deserialize;

use crate::error::{PlaybackError, Result};

/// One timed cue as it appears in the source file.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct WordTiming {
    text: String,
    start: f64,
    end: f64,
}

/// Parses either format, picking JSON when the document is a JSON array.
pub fn parse_subtitles(source: &str) -> Result<Vec<SubtitleCue>> {
    let body = source.trim_start_matches('\u{feff}').trim_start();
    if body.starts_with('[') {
        parse_word_timings(body)
    } else {
        parse_srt(body)
    }
}

pub fn parse_word_timings(source: &str) -> Result<Vec<SubtitleCue>> {
    let timings: Vec<WordTiming> = serde_json::from_str(source)
        .map_err(|e| PlaybackError::DecodingFailed(format!("word timings: {}", e)))?;

    let mut cues: Vec<SubtitleCue> = timings
        .into_iter()
        .filter(|t| !t.text.trim().is_empty() && t.start.is_finite() && t.end.is_finite())
        .map(|t| SubtitleCue {
            start: t.start.max(0.0),
            end: t.end.max(t.start.max(0.0)),
            text: t.text.trim().to_string(),
        })
        .collect();
    sort_cues(&mut cues);
    Ok(cues)
}

/// Parses SRT. Blocks without a valid timing line are skipped; a non-empty
/// file that yields no cue at all is rejected.
pub fn parse_srt(source: &str) -> Result<Vec<SubtitleCue>> {
    let normalized = source.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut cues = Vec::new();

    for block in normalized.split("\n\n") {
        let mut lines = block.lines().map(str::trim).filter(|l| !l.is_empty());
        let Some(mut timing) = lines.next() else {
            continue;
        };
        if !timing.contains("-->") {
            // Sequence number line.
            match lines.next() {
                Some(next) => timing = next,
                None => continue,
            }
        }

        let Some((start, end)) = parse_timing_line(timing) else {
            continue;
        };
        let text = lines.collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            continue;
        }

        cues.push(SubtitleCue {
            start,
            end: end.max(start),
            text,
        });
    }

    if cues.is_empty() && !normalized.trim().is_empty() {
        return Err(PlaybackError::DecodingFailed(
            "no subtitle cues found".to_string(),
        ));
    }

    sort_cues(&mut cues);
    Ok(cues)
}

fn sort_cues(cues: &mut [SubtitleCue]) {
    cues.sort_by(|a, b| a.start.total_cmp(&b.start));
}

fn parse_timing_line(line: &str) -> Option<(f64, f64)> {
    let (start, rest) = line.split_once("-->")?;
    // Anything after the end timestamp (positioning hints) is ignored.
    let end = rest.split_whitespace().next()?;
    Some((parse_timestamp(start.trim())?, parse_timestamp(end)?))
}

/// `HH:MM:SS,mmm` (a `.` separator and a missing hour field are tolerated).
fn parse_timestamp(value: &str) -> Option<f64> {
    let value = value.replace(',', ".");
    let mut fields: Vec<&str> = value.split(':').collect();
    if fields.len() == 2 {
        fields.insert(0, "0");
    }
    let [hours, minutes, seconds] = fields.as_slice() else {
        return None;
    };

    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    let seconds: f64 = seconds.parse().ok()?;
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some(f64::from(hours) * 3600.0 + f64::from(minutes) * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORD_SRT: &str = "1\r\n00:00:00,000 --> 00:00:00,400\r\nOnce\r\n\r\n2\r\n00:00:00,400 --> 00:00:00,900\r\nupon\r\n\r\n3\r\n00:01:02,500 --> 00:01:03,000\r\ntime.\r\n";

    #[test]
    fn test_parse_word_level_srt() {
        let cues = parse_srt(WORD_SRT).unwrap();
        assert_eq!(cues.len(), 3);
        assert_eq!(cues[0].text, "Once");
        assert_eq!(cues[1].start, 0.4);
        assert_eq!(cues[2].start, 62.5);
        assert_eq!(cues[2].text, "time.");
    }

    #[test]
    fn test_multiline_cue_and_missing_index() {
        let cues = parse_srt("00:00:01.000 --> 00:00:02.500 X:10\nHello there,\nfriend.\n").unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "Hello there, friend.");
        assert_eq!(cues[0].end, 2.5);
    }

    #[test]
    fn test_malformed_blocks_are_skipped() {
        let cues = parse_srt("1\nnot a timing\nHello\n\n2\n00:00:01,000 --> 00:00:02,000\nWorld\n").unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "World");

        assert!(matches!(
            parse_srt("garbage only"),
            Err(PlaybackError::DecodingFailed(_))
        ));
        assert!(parse_srt("").unwrap().is_empty());
    }

    #[test]
    fn test_json_word_timings_sorted() {
        let cues = parse_subtitles(
            r#"[{"text":"world","start":0.5,"end":0.9},{"text":"Hello","start":0.0,"end":0.5},{"text":" ","start":1.0,"end":1.1}]"#,
        )
        .unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "Hello");
        assert_eq!(cues[1].text, "world");
    }

    #[test]
    fn test_timestamp_bounds() {
        assert_eq!(parse_timestamp("01:00:00,250"), Some(3600.25));
        assert_eq!(parse_timestamp("00:61:00,000"), None);
        assert_eq!(parse_timestamp("abc"), None);
    }
}
