// File: src/utils/time.rs
//
// Chat-facing time formatting.

const BAR_SLOTS: u64 = 15;

/// `M:SS`, minutes unpadded. Hours roll into minutes.
pub fn format_time(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// A fixed-width text progress bar plus a percentage, for `np` output.
/// Unknown or zero durations render as an empty bar.
pub fn progress_bar(elapsed_secs: u64, duration_secs: u64) -> String {
    let filled = if duration_secs == 0 {
        0
    } else {
        (elapsed_secs.min(duration_secs) * BAR_SLOTS) / duration_secs
    };
    let percent = if duration_secs == 0 {
        0
    } else {
        (elapsed_secs.min(duration_secs) * 100) / duration_secs
    };
    let mut bar = String::new();
    for slot in 0..BAR_SLOTS {
        bar.push(if slot < filled { '▇' } else { '—' });
    }
    format!("{bar} {percent}%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes_and_padded_seconds() {
        assert_eq!(format_time(0), "0:00");
        assert_eq!(format_time(59), "0:59");
        assert_eq!(format_time(60), "1:00");
        assert_eq!(format_time(3725), "62:05");
    }

    #[test]
    fn progress_bar_bounds() {
        assert_eq!(progress_bar(0, 100), "——————————————— 0%");
        assert_eq!(progress_bar(100, 100), "▇▇▇▇▇▇▇▇▇▇▇▇▇▇▇ 100%");
        // Elapsed past the end clamps instead of overflowing the bar.
        assert_eq!(progress_bar(250, 100), "▇▇▇▇▇▇▇▇▇▇▇▇▇▇▇ 100%");
    }

    #[test]
    fn progress_bar_midpoint() {
        let bar = progress_bar(50, 100);
        assert!(bar.starts_with("▇▇▇▇▇▇▇———"));
        assert!(bar.ends_with(" 50%"));
    }

    #[test]
    fn progress_bar_unknown_duration() {
        assert_eq!(progress_bar(42, 0), "——————————————— 0%");
    }
}
