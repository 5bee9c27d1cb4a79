//! Cut-point computation for merged windows.
//!
//! A window is padded by the buffer on both sides and clamped to the source.
//! When the padded range is longer than the synthesis service can produce,
//! the tail is given up first: the onset of flagged content is the cut point
//! that matters most. The tail is never pulled back before
//! `window.start + min_flagged_coverage`.

use recut_models::{MergedWindow, ReconstructionConfig, ReplacementTask};
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Locator parameters, taken from the job configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocatorParams {
    pub buffer_secs: f64,
    pub max_synthesis_duration: f64,
    pub min_flagged_coverage: f64,
}

impl From<&ReconstructionConfig> for LocatorParams {
    fn from(config: &ReconstructionConfig) -> Self {
        Self {
            buffer_secs: config.buffer_secs,
            max_synthesis_duration: config.max_synthesis_duration_secs,
            min_flagged_coverage: config.min_flagged_coverage_secs,
        }
    }
}

/// Compute the cut contract for one window.
pub fn locate(
    index: usize,
    window: &MergedWindow,
    params: &LocatorParams,
    source_duration: f64,
) -> WorkerResult<ReplacementTask> {
    if window.start >= source_duration || window.end <= 0.0 {
        return Err(WorkerError::WindowOutOfRange {
            index,
            message: format!(
                "window {:.3}-{:.3}s, source is {:.3}s",
                window.start, window.end, source_duration
            ),
        });
    }

    let ideal_start = (window.start - params.buffer_secs).max(0.0);
    let ideal_end = (window.end + params.buffer_secs).min(source_duration);
    let ideal_span = ideal_end - ideal_start;

    let (start, end) = if ideal_span > params.max_synthesis_duration {
        let floor = (window.start + params.min_flagged_coverage).min(ideal_end);
        let end = (ideal_start + params.max_synthesis_duration).max(floor);
        // The floor can only win when the buffer before the window is longer
        // than the limit allows; shift the start forward instead.
        let start = if end - ideal_start > params.max_synthesis_duration {
            (end - params.max_synthesis_duration).max(ideal_start)
        } else {
            ideal_start
        };
        (start, end)
    } else {
        (ideal_start, ideal_end)
    };

    let trimmed_seconds = (ideal_span - (end - start)).max(0.0);
    let was_trimmed = trimmed_seconds > 0.0;
    if was_trimmed {
        debug!(
            window_index = index,
            ideal_span,
            trimmed_seconds,
            "Window trimmed to fit synthesis limit"
        );
    }

    Ok(ReplacementTask {
        window_index: index,
        window_start: start,
        window_end: end,
        was_trimmed,
        trimmed_seconds,
        flagged_start: window.start,
        flagged_end: window.end,
    })
}

/// Locate every window and resolve overlaps introduced by buffering.
///
/// Neighbouring tasks whose padded ranges overlap are split at the midpoint
/// of the gap between their flagged ranges, clamped into the overlap. Both
/// tasks are then marked trimmed.
pub fn locate_all(
    windows: &[MergedWindow],
    params: &LocatorParams,
    source_duration: f64,
) -> WorkerResult<Vec<ReplacementTask>> {
    let mut tasks = windows
        .iter()
        .enumerate()
        .map(|(i, w)| locate(i, w, params, source_duration))
        .collect::<WorkerResult<Vec<_>>>()?;

    for i in 1..tasks.len() {
        let (head, tail) = tasks.split_at_mut(i);
        let prev = &mut head[i - 1];
        let next = &mut tail[0];
        if prev.window_end <= next.window_start {
            continue;
        }

        let midpoint = (prev.flagged_end + next.flagged_start) / 2.0;
        let split = midpoint.clamp(next.window_start, prev.window_end);

        prev.trimmed_seconds += prev.window_end - split;
        prev.window_end = split;
        prev.was_trimmed = true;

        next.trimmed_seconds += split - next.window_start;
        next.window_start = split;
        next.was_trimmed = true;

        debug!(
            window_index = next.window_index,
            split, "Split overlapping buffered windows"
        );
    }

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use recut_models::ScoredSegment;

    fn window(start: f64, end: f64) -> MergedWindow {
        MergedWindow::from(&ScoredSegment::new(start, end).unwrap())
    }

    fn params() -> LocatorParams {
        LocatorParams::from(&ReconstructionConfig::default())
    }

    #[test]
    fn test_short_window_gets_full_buffer() {
        let task = locate(0, &window(20.0, 23.0), &params(), 100.0).unwrap();
        assert_eq!(task.window_start, 18.5);
        assert_eq!(task.window_end, 24.5);
        assert!(!task.was_trimmed);
        assert_eq!(task.trimmed_seconds, 0.0);
        assert_eq!(task.flagged_start, 20.0);
    }

    #[test]
    fn test_buffer_clamped_to_source() {
        let task = locate(0, &window(0.5, 3.0), &params(), 4.0).unwrap();
        assert_eq!(task.window_start, 0.0);
        assert_eq!(task.window_end, 4.0);
    }

    #[test]
    fn test_long_window_trims_tail() {
        let task = locate(2, &window(30.0, 45.0), &params(), 100.0).unwrap();
        assert_eq!(task.window_start, 28.5);
        assert_eq!(task.window_end, 36.5);
        assert!(task.was_trimmed);
        assert!((task.trimmed_seconds - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_coverage_floor_shifts_start() {
        let p = LocatorParams {
            buffer_secs: 5.0,
            max_synthesis_duration: 4.0,
            min_flagged_coverage: 1.0,
        };
        let task = locate(0, &window(10.0, 20.0), &p, 100.0).unwrap();
        assert_eq!(task.window_end, 11.0);
        assert_eq!(task.window_start, 7.0);
        assert!(task.window_start <= 10.0);
    }

    #[test]
    fn test_window_past_source_end_is_rejected() {
        let err = locate(3, &window(120.0, 125.0), &params(), 100.0).unwrap_err();
        assert!(matches!(err, WorkerError::WindowOutOfRange { index: 3, .. }));
    }

    #[test]
    fn test_overlapping_buffers_split_at_midpoint() {
        let tasks =
            locate_all(&[window(10.0, 12.0), window(14.5, 16.0)], &params(), 100.0).unwrap();

        assert_eq!(tasks[0].window_end, 13.25);
        assert_eq!(tasks[1].window_start, 13.25);
        assert!(tasks.iter().all(|t| t.was_trimmed));
        assert_eq!(tasks[0].window_start, 8.5);
        assert_eq!(tasks[1].window_end, 17.5);
    }

    fn arb_windows() -> impl Strategy<Value = (Vec<MergedWindow>, f64)> {
        proptest::collection::vec((0.1f64..10.0, 0.05f64..20.0), 1..12).prop_map(|specs| {
            let mut cursor = 0.0;
            let mut windows = Vec::new();
            for (gap, len) in specs {
                let start = cursor + gap;
                windows.push(window(start, start + len));
                cursor = start + len;
            }
            (windows, cursor + 1.0)
        })
    }

    fn arb_params() -> impl Strategy<Value = LocatorParams> {
        (0.0f64..4.0, 1.0f64..12.0, 0.1f64..1.0).prop_map(|(buffer, max, coverage)| {
            LocatorParams {
                buffer_secs: buffer,
                max_synthesis_duration: max,
                min_flagged_coverage: coverage,
            }
        })
    }

    proptest! {
        #[test]
        fn prop_span_within_limit_and_start_not_past_onset(
            (windows, duration) in arb_windows(),
            p in arb_params(),
        ) {
            for (i, w) in windows.iter().enumerate() {
                let task = locate(i, w, &p, duration).unwrap();
                prop_assert!(task.span() <= p.max_synthesis_duration + 1e-9);
                prop_assert!(task.window_start <= w.start);
                prop_assert!(task.window_start >= 0.0);
                prop_assert!(task.window_end <= duration);
                prop_assert!(task.span() > 0.0);
            }
        }

        #[test]
        fn prop_locate_all_tasks_are_disjoint(
            (windows, duration) in arb_windows(),
            p in arb_params(),
        ) {
            let tasks = locate_all(&windows, &p, duration).unwrap();
            prop_assert_eq!(tasks.len(), windows.len());
            for pair in tasks.windows(2) {
                prop_assert!(pair[0].window_end <= pair[1].window_start);
            }
            for (task, w) in tasks.iter().zip(&windows) {
                prop_assert!(task.span() <= p.max_synthesis_duration + 1e-9);
                prop_assert!(task.window_start <= w.start);
                prop_assert!(task.span() > 0.0);
            }
        }
    }
}
