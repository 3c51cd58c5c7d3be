//! Median-cut color quantization.
//!
//! Buckets start as the distinct colors of the image, weighted by how often
//! they occur, and the bucket with the widest channel range is split at its
//! weighted median until the target count is reached. Everything iterates in
//! first-seen order so that the resulting palette is stable across runs.

use std::collections::HashMap;

use image::{Rgba, RgbaImage};

type Entry = (Rgba<u8>, u32);

/// Reduces `img` to at most `max_colors` colors.
///
/// When the image already has no more than `max_colors` distinct colors they
/// are returned as-is, in row-major first-seen order.
pub fn median_cut(img: &RgbaImage, max_colors: usize) -> Vec<Rgba<u8>> {
    let mut counts: HashMap<Rgba<u8>, u32> = HashMap::new();
    let mut order = Vec::new();
    for px in img.pixels() {
        let count = counts.entry(*px).or_insert(0);
        if *count == 0 {
            order.push(*px);
        }
        *count += 1;
    }

    if order.len() <= max_colors {
        return order;
    }

    let colors: Vec<Entry> = order.into_iter().map(|c| (c, counts[&c])).collect();
    let mut buckets = vec![colors];
    while buckets.len() < max_colors {
        let Some((index, channel)) = widest_bucket(&buckets) else {
            break;
        };
        let upper = split_bucket(&mut buckets[index], channel);
        buckets.push(upper);
    }

    buckets.iter().map(|bucket| average(bucket)).collect()
}

/// Picks the bucket and channel with the largest value range. Only buckets
/// that can still be split are considered; earlier buckets win ties.
fn widest_bucket(buckets: &[Vec<Entry>]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize, u8)> = None;
    for (i, bucket) in buckets.iter().enumerate() {
        if bucket.len() < 2 {
            continue;
        }
        for channel in 0..4 {
            let mut min = u8::MAX;
            let mut max = u8::MIN;
            for (color, _) in bucket {
                min = min.min(color.0[channel]);
                max = max.max(color.0[channel]);
            }
            let range = max - min;
            if best.map_or(true, |(_, _, r)| range > r) {
                best = Some((i, channel, range));
            }
        }
    }
    best.map(|(index, channel, _)| (index, channel))
}

/// Splits `bucket` at the weighted median of `channel`, returning the upper
/// half. Both halves stay non-empty.
fn split_bucket(bucket: &mut Vec<Entry>, channel: usize) -> Vec<Entry> {
    bucket.sort_by_key(|(color, _)| color.0[channel]);

    let total: u64 = bucket.iter().map(|(_, n)| u64::from(*n)).sum();
    let mut seen = 0u64;
    let mut cut = bucket.len() - 1;
    for (i, (_, n)) in bucket.iter().enumerate() {
        seen += u64::from(*n);
        if seen * 2 >= total && i + 1 < bucket.len() {
            cut = i + 1;
            break;
        }
    }

    bucket.split_off(cut)
}

/// Population-weighted mean color of a bucket.
fn average(bucket: &[Entry]) -> Rgba<u8> {
    let mut sum = [0u64; 4];
    let mut total = 0u64;
    for (color, n) in bucket {
        for channel in 0..4 {
            sum[channel] += u64::from(color.0[channel]) * u64::from(*n);
        }
        total += u64::from(*n);
    }
    Rgba([0, 1, 2, 3].map(|channel| ((sum[channel] + total / 2) / total) as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_palettes_pass_through_in_scan_order() {
        let img = RgbaImage::from_fn(64, 40, |x, _| {
            Rgba([if x < 32 { 0 } else { 0xff }, 0, 0, 0xff])
        });
        let palette = median_cut(&img, 16);
        assert_eq!(
            palette,
            vec![Rgba([0, 0, 0, 0xff]), Rgba([0xff, 0, 0, 0xff])]
        );
    }

    #[test]
    fn reduces_to_target_count() {
        let img = RgbaImage::from_fn(64, 40, |x, y| {
            Rgba([(x * 4) as u8, (y * 6) as u8, 0, 0xff])
        });
        let palette = median_cut(&img, 48);
        assert_eq!(palette.len(), 48);
    }

    #[test]
    fn is_deterministic() {
        let img = RgbaImage::from_fn(64, 40, |x, y| {
            Rgba([(x * 3) as u8, (y * 5) as u8, (x + y) as u8, 0xff])
        });
        assert_eq!(median_cut(&img, 32), median_cut(&img, 32));
    }
}
