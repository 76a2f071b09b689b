//! Subtitle Alignment Engine
//!
//! Holds a word-level and a sentence-level stream built from the same cues
//! and maps a playback time to an index in either stream. The two streams are
//! numbered independently.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::subtitles::parser::{parse_subtitles, SubtitleCue};

/// Saved offsets at or below this are treated as "start from the top".
pub const RESUME_THRESHOLD_SECS: f64 = 0.5;

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '…', '。', '！', '？'];
const TRAILING_CLOSERS: &[char] = &['"', '\'', '”', '’', ')', ']', '」', '』'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleMode {
    #[default]
    Word,
    Sentence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleItem {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl SubtitleItem {
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

/// Previous/current/next window around one index.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubtitleContext {
    pub previous: Option<SubtitleItem>,
    pub current: Option<SubtitleItem>,
    pub next: Option<SubtitleItem>,
}

impl SubtitleContext {
    /// Window text joined with spaces, skipping missing slots.
    pub fn text(&self) -> String {
        [&self.previous, &self.current, &self.next]
            .into_iter()
            .flatten()
            .map(|item| item.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtitleTrack {
    words: Vec<SubtitleItem>,
    sentences: Vec<SubtitleItem>,
}

impl SubtitleTrack {
    /// Track with no items; every lookup yields `None`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse(source: &str) -> Result<Self> {
        Ok(Self::from_cues(parse_subtitles(source)?))
    }

    /// Single-token cues are words and get grouped into sentences at terminal
    /// punctuation. Multi-token cues are sentences and get split into words,
    /// with the cue's time spread by character length.
    pub fn from_cues(cues: Vec<SubtitleCue>) -> Self {
        let mut words = Vec::new();
        let mut sentences = Vec::new();
        let mut pending: Vec<SubtitleItem> = Vec::new();

        for cue in cues {
            let tokens: Vec<&str> = cue.text.split_whitespace().collect();
            if tokens.len() <= 1 {
                let word = SubtitleItem {
                    text: cue.text.trim().to_string(),
                    start: cue.start,
                    end: cue.end,
                };
                let closes_sentence = ends_sentence(&word.text);
                words.push(word.clone());
                pending.push(word);
                if closes_sentence {
                    sentences.extend(join_words(&mut pending));
                }
                continue;
            }

            sentences.extend(join_words(&mut pending));
            words.extend(split_sentence(&tokens, cue.start, cue.end));
            sentences.push(SubtitleItem {
                text: tokens.join(" "),
                start: cue.start,
                end: cue.end,
            });
        }
        sentences.extend(join_words(&mut pending));

        Self { words, sentences }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty() && self.sentences.is_empty()
    }

    pub fn items(&self, mode: SubtitleMode) -> &[SubtitleItem] {
        match mode {
            SubtitleMode::Word => &self.words,
            SubtitleMode::Sentence => &self.sentences,
        }
    }

    /// Item whose interval contains `time`, else the nearest item starting
    /// before it. `None` before the first item.
    pub fn index(&self, time: f64, mode: SubtitleMode) -> Option<usize> {
        if !time.is_finite() {
            return None;
        }
        let items = self.items(mode);
        let after = items.partition_point(|item| item.start <= time);
        let candidate = after.checked_sub(1)?;

        // Overlapping cues: prefer the one still running.
        if !items[candidate].contains(time) && candidate > 0 && items[candidate - 1].contains(time)
        {
            return Some(candidate - 1);
        }
        Some(candidate)
    }

    pub fn context(&self, index: usize, mode: SubtitleMode) -> SubtitleContext {
        let items = self.items(mode);
        SubtitleContext {
            previous: index.checked_sub(1).and_then(|i| items.get(i)).cloned(),
            current: items.get(index).cloned(),
            next: index.checked_add(1).and_then(|i| items.get(i)).cloned(),
        }
    }

    pub fn context_at(&self, time: f64, mode: SubtitleMode) -> Option<SubtitleContext> {
        self.index(time, mode).map(|index| self.context(index, mode))
    }
}

/// Position playback should jump to when a chapter opens, or `None` for a
/// clean start at zero.
pub fn initial_resume_position(saved_position: Option<f64>, total_duration: Option<f64>) -> Option<f64> {
    let position = saved_position.filter(|p| p.is_finite())?;
    let clamped = match total_duration.filter(|d| d.is_finite() && *d > 0.0) {
        Some(duration) => position.clamp(0.0, duration),
        None => position.max(0.0),
    };
    (clamped > RESUME_THRESHOLD_SECS).then_some(clamped)
}

fn ends_sentence(word: &str) -> bool {
    word.trim_end_matches(TRAILING_CLOSERS)
        .ends_with(SENTENCE_TERMINATORS)
}

fn join_words(pending: &mut Vec<SubtitleItem>) -> Option<SubtitleItem> {
    let first = pending.first()?;
    let last = pending.last()?;
    let sentence = SubtitleItem {
        text: pending
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        start: first.start,
        end: last.end,
    };
    pending.clear();
    Some(sentence)
}

fn split_sentence(tokens: &[&str], start: f64, end: f64) -> Vec<SubtitleItem> {
    let total_chars: usize = tokens.iter().map(|t| t.chars().count()).sum();
    let span = (end - start).max(0.0);
    let mut cursor = start;

    tokens
        .iter()
        .enumerate()
        .map(|(i, token)| {
            let share = if total_chars == 0 {
                1.0 / tokens.len() as f64
            } else {
                token.chars().count() as f64 / total_chars as f64
            };
            let word_end = if i + 1 == tokens.len() {
                end
            } else {
                cursor + span * share
            };
            let item = SubtitleItem {
                text: (*token).to_string(),
                start: cursor,
                end: word_end,
            };
            cursor = word_end;
            item
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(text: &str, start: f64, end: f64) -> SubtitleCue {
        SubtitleCue {
            start,
            end,
            text: text.to_string(),
        }
    }

    fn word_track() -> SubtitleTrack {
        SubtitleTrack::from_cues(vec![
            cue("Once", 0.0, 0.4),
            cue("upon", 0.4, 0.8),
            cue("a", 0.8, 0.9),
            cue("time.", 0.9, 1.5),
            cue("The", 2.0, 2.3),
            cue("end!”", 2.3, 2.8),
        ])
    }

    #[test]
    fn test_words_grouped_into_sentences() {
        let track = word_track();
        assert_eq!(track.items(SubtitleMode::Word).len(), 6);

        let sentences = track.items(SubtitleMode::Sentence);
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].text, "Once upon a time.");
        assert_eq!(sentences[0].start, 0.0);
        assert_eq!(sentences[0].end, 1.5);
        assert_eq!(sentences[1].text, "The end!”");
    }

    #[test]
    fn test_index_contains_or_nearest_preceding() {
        let track = word_track();
        assert_eq!(track.index(0.5, SubtitleMode::Word), Some(1));
        // Gap between "time." and "The".
        assert_eq!(track.index(1.8, SubtitleMode::Word), Some(3));
        assert_eq!(track.index(99.0, SubtitleMode::Word), Some(5));
        assert_eq!(track.index(-1.0, SubtitleMode::Word), None);
        assert_eq!(track.index(f64::NAN, SubtitleMode::Word), None);
    }

    #[test]
    fn test_modes_are_indexed_independently() {
        let track = word_track();
        assert_eq!(track.index(2.5, SubtitleMode::Word), Some(5));
        assert_eq!(track.index(2.5, SubtitleMode::Sentence), Some(1));
    }

    #[test]
    fn test_sentence_cues_are_split_by_length() {
        let track = SubtitleTrack::from_cues(vec![cue("ab abcdef", 10.0, 12.0)]);
        let words = track.items(SubtitleMode::Word);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].start, 10.0);
        assert!((words[0].end - 10.5).abs() < 1e-9);
        assert_eq!(words[1].end, 12.0);
        assert_eq!(track.items(SubtitleMode::Sentence).len(), 1);
    }

    #[test]
    fn test_context_boundaries() {
        let track = word_track();
        let first = track.context(0, SubtitleMode::Word);
        assert!(first.previous.is_none());
        assert_eq!(first.current.unwrap().text, "Once");
        assert_eq!(first.next.unwrap().text, "upon");

        let last = track.context(1, SubtitleMode::Sentence);
        assert_eq!(last.previous.unwrap().text, "Once upon a time.");
        assert!(last.next.is_none());

        let window = track.context_at(0.85, SubtitleMode::Word).unwrap();
        assert_eq!(window.text(), "upon a time.");
    }

    #[test]
    fn test_initial_resume_position() {
        assert_eq!(initial_resume_position(Some(42.0), Some(60.0)), Some(42.0));
        assert_eq!(initial_resume_position(Some(75.0), Some(60.0)), Some(60.0));
        assert_eq!(initial_resume_position(Some(0.5), Some(60.0)), None);
        assert_eq!(initial_resume_position(Some(0.51), None), Some(0.51));
        assert_eq!(initial_resume_position(None, Some(60.0)), None);
        assert_eq!(initial_resume_position(Some(-3.0), Some(60.0)), None);
    }

    #[test]
    fn test_parse_srt_track() {
        let track = SubtitleTrack::parse(
            "1\n00:00:00,000 --> 00:00:02,000\nHello there friend.\n\n2\n00:00:02,000 --> 00:00:02,500\nBye.\n",
        )
        .unwrap();
        assert_eq!(track.items(SubtitleMode::Sentence).len(), 2);
        assert_eq!(track.items(SubtitleMode::Word).len(), 4);
        assert!(SubtitleTrack::empty().is_empty());
    }
}
