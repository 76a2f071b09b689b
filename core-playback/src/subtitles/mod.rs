//! # Subtitles
//!
//! Parsing of subtitle files and the time-to-index alignment used by the
//! playback session.

pub mod alignment;
pub mod parser;

pub use alignment::{
    initial_resume_position, SubtitleContext, SubtitleItem, SubtitleMode, SubtitleTrack,
    RESUME_THRESHOLD_SECS,
};
pub use parser::{parse_srt, parse_subtitles, parse_word_timings, SubtitleCue};
