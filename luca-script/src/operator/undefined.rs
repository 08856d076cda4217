//! Process-wide tracker for opcodes that fell through to the undefined
//! handler. Counts accumulate silently during a run and surface as a
//! single summary instead of per-line noise.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

#[derive(Default)]
struct Tracker {
    counts: HashMap<String, usize>,
    total: usize,
}

fn tracker() -> &'static Mutex<Tracker> {
    static TRACKER: OnceLock<Mutex<Tracker>> = OnceLock::new();
    TRACKER.get_or_init(|| Mutex::new(Tracker::default()))
}

/// Record one occurrence of an undefined opcode.
pub fn track(name: &str) {
    let mut t = tracker().lock().unwrap();
    *t.counts.entry(name.to_string()).or_insert(0) += 1;
    t.total += 1;
}

/// Clear all tracked data. Called once per driver run, after the summary.
pub fn reset() {
    let mut t = tracker().lock().unwrap();
    t.counts.clear();
    t.total = 0;
}

/// Formatted summary sorted by count descending, or `None` when nothing
/// fell through.
pub fn summary() -> Option<String> {
    let t = tracker().lock().unwrap();
    if t.total == 0 {
        return None;
    }
    let mut entries: Vec<(&String, &usize)> = t.counts.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let mut out = format!(
        "[INFO] {} undefined opcodes dumped as raw params ({} unique):\n",
        t.total,
        entries.len()
    );
    for (name, count) in entries {
        out.push_str(&format!("  {:<20}  x{}\n", name, count));
    }
    out.push_str("These are non-text opcodes (visual/audio/system) and are safe to leave as-is for translation work.");
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_sort_by_frequency() {
        // Other tests share the global tracker, so only assert on the
        // names this test owns.
        track("FADE_TEST");
        track("FADE_TEST");
        track("BGM_TEST");
        let s = summary().unwrap();
        assert!(s.contains("FADE_TEST"));
        assert!(s.contains("x2"));
        let fade_pos = s.find("FADE_TEST").unwrap();
        let bgm_pos = s.find("BGM_TEST").unwrap();
        assert!(fade_pos < bgm_pos, "higher counts sort first");
    }
}
