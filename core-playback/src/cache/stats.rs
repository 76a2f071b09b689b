//! Cache statistics

use serde::{Deserialize, Serialize};

/// Snapshot of what the media cache directory currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCacheStats {
    /// Number of cached media files (audio and subtitles)
    pub entries: usize,

    /// Number of entries carrying a revalidation token
    pub tokened_entries: usize,

    /// Bytes used by cached media files
    pub total_bytes: u64,
}

impl MediaCacheStats {
    /// Returns average bytes per cached file.
    pub fn average_entry_size(&self) -> u64 {
        if self.entries == 0 {
            0
        } else {
            self.total_bytes / self.entries as u64
        }
    }

    /// Human-readable size, e.g. "12.5 MB".
    pub fn formatted_size(&self) -> String {
        const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
        let mut size = self.total_bytes as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            format!("{} {}", self.total_bytes, UNITS[0])
        } else {
            format!("{:.1} {}", size, UNITS[unit])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_and_format() {
        let stats = MediaCacheStats {
            entries: 4,
            tokened_entries: 2,
            total_bytes: 3 * 1024 * 1024,
        };
        assert_eq!(stats.average_entry_size(), 786_432);
        assert_eq!(stats.formatted_size(), "3.0 MB");
        assert_eq!(MediaCacheStats::default().average_entry_size(), 0);
        assert_eq!(MediaCacheStats::default().formatted_size(), "0 B");
    }
}
