use crate::SegmentConfig;
use std::fs;
use std::path::Path;

/// Config whose index holds exactly `entries` records.
pub fn small_config(entries: u64) -> SegmentConfig {
    SegmentConfig::with_index_entries(entries)
}

pub fn file_len(path: &Path) -> u64 {
    fs::metadata(path).unwrap().len()
}

pub fn count_segment_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == crate::STORE_EXTENSION || ext == crate::INDEX_EXTENSION)
                .unwrap_or(false)
        })
        .count()
}
