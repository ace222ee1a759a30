// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-channel activity statistics.
//!
//! Variance, mean and standard deviation per channel over a recent window,
//! plus the set of channels whose variance exceeds three times the median
//! variance (the noise floor).

/// Channel-activity report over a recent sample window.
#[derive(Clone, Debug)]
pub struct ChannelActivity {
    /// Channels in the analyzed window.
    pub total_channels: usize,

    /// Indices of channels with variance above the active threshold.
    pub active_channels: Vec<usize>,

    /// Per-channel variance (signal power).
    pub channel_power: Vec<f64>,

    /// Per-channel mean.
    pub channel_mean: Vec<f64>,

    /// Per-channel standard deviation.
    pub channel_std: Vec<f64>,

    /// Median of the per-channel variances.
    pub noise_floor: f64,

    /// `3 x noise_floor`; channels above it count as active.
    pub active_threshold: f64,

    /// Largest per-channel variance.
    pub max_channel_power: f64,

    /// Smallest per-channel variance.
    pub min_channel_power: f64,
}

/// Multiple of the median variance a channel must exceed to count active.
const ACTIVE_FACTOR: f64 = 3.0;

/// Compute activity statistics over `rows` (each row one sample across all
/// channels). Returns `None` for an empty window.
pub fn channel_activity(rows: &[Vec<f32>]) -> Option<ChannelActivity> {
    let n_rows = rows.len();
    if n_rows == 0 {
        return None;
    }
    let n_channels = rows[0].len();
    if n_channels == 0 {
        return None;
    }

    let mut mean = vec![0.0f64; n_channels];
    for row in rows {
        for (ch, &v) in row.iter().enumerate().take(n_channels) {
            mean[ch] += v as f64;
        }
    }
    for m in &mut mean {
        *m /= n_rows as f64;
    }

    let mut power = vec![0.0f64; n_channels];
    for row in rows {
        for (ch, &v) in row.iter().enumerate().take(n_channels) {
            let d = v as f64 - mean[ch];
            power[ch] += d * d;
        }
    }
    for p in &mut power {
        *p /= n_rows as f64;
    }
    let std: Vec<f64> = power.iter().map(|&p| p.sqrt()).collect();

    let noise_floor = median(&power);
    let active_threshold = noise_floor * ACTIVE_FACTOR;
    let active_channels: Vec<usize> = power
        .iter()
        .enumerate()
        .filter(|(_, &p)| p > active_threshold)
        .map(|(ch, _)| ch)
        .collect();

    let max_channel_power = power.iter().cloned().fold(f64::MIN, f64::max);
    let min_channel_power = power.iter().cloned().fold(f64::MAX, f64::min);

    Some(ChannelActivity {
        total_channels: n_channels,
        active_channels,
        channel_power: power,
        channel_mean: mean,
        channel_std: std,
        noise_floor,
        active_threshold,
        max_channel_power,
        min_channel_power,
    })
}

/// Median of a non-empty slice (mean of the middle pair for even lengths).
fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window() {
        assert!(channel_activity(&[]).is_none());
    }

    #[test]
    fn test_flat_channels_have_no_activity() {
        let rows: Vec<Vec<f32>> = (0..10).map(|_| vec![1.0, 2.0, 3.0]).collect();
        let act = channel_activity(&rows).unwrap();
        assert_eq!(act.total_channels, 3);
        assert!(act.active_channels.is_empty());
        assert_eq!(act.channel_mean, vec![1.0, 2.0, 3.0]);
        assert!(act.channel_power.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_active_channel_detection() {
        // Channels 0..3 carry small alternating noise; channel 3 swings hard.
        let rows: Vec<Vec<f32>> = (0..100)
            .map(|i| {
                let s = if i % 2 == 0 { 1.0 } else { -1.0 };
                vec![0.1 * s, 0.1 * s, 0.1 * s, 50.0 * s]
            })
            .collect();
        let act = channel_activity(&rows).unwrap();
        assert_eq!(act.active_channels, vec![3]);
        assert!(act.active_threshold > act.noise_floor);
        assert!(act.max_channel_power > act.min_channel_power);
    }

    #[test]
    fn test_variance_and_std_agree() {
        let rows: Vec<Vec<f32>> = vec![vec![0.0], vec![2.0], vec![0.0], vec![2.0]];
        let act = channel_activity(&rows).unwrap();
        assert!((act.channel_mean[0] - 1.0).abs() < 1e-12);
        assert!((act.channel_power[0] - 1.0).abs() < 1e-12);
        assert!((act.channel_std[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }
}
