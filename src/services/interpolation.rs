//! Linear interpolation over stored price points.
//!
//! The engine never refuses on low confidence; downstream consumers gate on
//! the score themselves.

use crate::models::price::{Network, PricePoint};
use crate::services::price_store::PriceStore;

/// Gap beyond which time confidence bottoms out, seconds.
const MAX_GAP_SECS: f64 = 7.0 * 86400.0;

/// Relative price change beyond which stability confidence bottoms out.
const MAX_REL_CHANGE: f64 = 0.50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolatedPrice {
    pub price: f64,
    pub confidence: f64,
}

/// Interpolate between two known points straddling `target_ts`.
///
/// Returns `None` when the pair is degenerate (same timestamp) or does not
/// actually straddle the target.
pub fn interpolate_between(
    before: &PricePoint,
    after: &PricePoint,
    target_ts: i64,
) -> Option<InterpolatedPrice> {
    if before.unix_ts == after.unix_ts {
        return None;
    }
    if target_ts < before.unix_ts || target_ts > after.unix_ts {
        return None;
    }

    let gap = (after.unix_ts - before.unix_ts) as f64;
    let ratio = (target_ts - before.unix_ts) as f64 / gap;
    let price = before.price + (after.price - before.price) * ratio;
    let price = round_2dp(price);

    let time_conf = (1.0 - gap / MAX_GAP_SECS).max(0.0);

    let stability_conf = if before.price > 0.0 {
        let rel_change = (after.price - before.price).abs() / before.price;
        (1.0 - rel_change / MAX_REL_CHANGE).max(0.0)
    } else {
        0.0
    };

    let d_before = (target_ts - before.unix_ts) as f64;
    let d_after = (after.unix_ts - target_ts) as f64;
    let position_conf = if d_before.max(d_after) > 0.0 {
        d_before.min(d_after) / d_before.max(d_after)
    } else {
        1.0
    };

    let confidence = 0.4 * time_conf + 0.4 * stability_conf + 0.2 * position_conf;
    let confidence = confidence.clamp(0.0, 1.0);

    Some(InterpolatedPrice { price, confidence })
}

/// Interpolate at `target_ts` from the store's straddling pair.
pub async fn interpolate_at(
    store: &dyn PriceStore,
    token: &str,
    network: Network,
    target_ts: i64,
) -> Option<InterpolatedPrice> {
    let (before, after) = store.get_straddling(token, network, target_ts).await;
    let before = before?;
    let after = after?;
    interpolate_between(&before, &after, target_ts)
}

/// Batch form: one aligned result per target timestamp.
///
/// Store queries are coalesced into a single prefetch of the covered range
/// plus the two boundary neighbors; per-timestamp semantics are identical to
/// [`interpolate_at`].
pub async fn batch_interpolate(
    store: &dyn PriceStore,
    token: &str,
    network: Network,
    targets: &[i64],
) -> Vec<Option<InterpolatedPrice>> {
    if targets.is_empty() {
        return Vec::new();
    }

    let min_ts = *targets.iter().min().unwrap_or(&0);
    let max_ts = *targets.iter().max().unwrap_or(&0);

    let mut series = store.get_range(token, network, min_ts, max_ts).await;
    let (below, _) = store.get_straddling(token, network, min_ts).await;
    let (_, above) = store.get_straddling(token, network, max_ts).await;
    if let Some(point) = below {
        if series.first().map(|p| p.unix_ts) != Some(point.unix_ts) {
            series.insert(0, point);
        }
    }
    if let Some(point) = above {
        if series.last().map(|p| p.unix_ts) != Some(point.unix_ts) {
            series.push(point);
        }
    }

    targets
        .iter()
        .map(|&ts| {
            let (before, after) = straddle_in(&series, ts);
            match (before, after) {
                (Some(b), Some(a)) => interpolate_between(b, a, ts),
                _ => None,
            }
        })
        .collect()
}

/// Binary-search the straddling pair inside an ascending series.
pub fn straddle_in(series: &[PricePoint], target_ts: i64) -> (Option<&PricePoint>, Option<&PricePoint>) {
    let idx = series.partition_point(|p| p.unix_ts < target_ts);
    // idx is the first point with unix_ts >= target_ts
    let after = series.get(idx);
    let before = if idx < series.len() && series[idx].unix_ts == target_ts {
        Some(&series[idx])
    } else if idx > 0 {
        Some(&series[idx - 1])
    } else {
        None
    };
    (before, after)
}

pub fn round_2dp(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::price::PriceSource;

    fn point(unix_ts: i64, price: f64) -> PricePoint {
        PricePoint {
            token: "ETH".to_string(),
            network: Network::Ethereum,
            unix_ts,
            price,
            source: PriceSource::Upstream,
            confidence: 1.0,
        }
    }

    #[test]
    fn midpoint_is_linear() {
        // 2024-01-01 and 2024-01-03, target 2024-01-02
        let before = point(1704067200, 2000.0);
        let after = point(1704240000, 2200.0);
        let result = interpolate_between(&before, &after, 1704153600).unwrap();
        assert_eq!(result.price, 2100.0);
    }

    #[test]
    fn confidence_follows_the_weighted_formula() {
        let before = point(1704067200, 2000.0);
        let after = point(1704240000, 2200.0);
        let result = interpolate_between(&before, &after, 1704153600).unwrap();
        // gap 2d: time_conf = 1 - 2/7; rel change 10%: stability = 0.8;
        // midpoint: position = 1.0
        let expected = 0.4 * (1.0 - 2.0 / 7.0) + 0.4 * 0.8 + 0.2 * 1.0;
        assert!((result.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn degenerate_pair_returns_none() {
        let before = point(1704067200, 2000.0);
        let after = point(1704067200, 2100.0);
        assert!(interpolate_between(&before, &after, 1704067200).is_none());
    }

    #[test]
    fn off_center_position_lowers_confidence() {
        let before = point(0, 100.0);
        let after = point(4 * 86400, 100.0);
        let midpoint = interpolate_between(&before, &after, 2 * 86400).unwrap();
        let skewed = interpolate_between(&before, &after, 86400).unwrap();
        assert!(skewed.confidence < midpoint.confidence);
        // d_before 1d, d_after 3d: position_conf = 1/3
        let expected = 0.4 * (1.0 - 4.0 / 7.0) + 0.4 * 1.0 + 0.2 * (1.0 / 3.0);
        assert!((skewed.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn wide_gap_bottoms_out_time_confidence() {
        let before = point(0, 100.0);
        let after = point(14 * 86400, 100.0);
        let result = interpolate_between(&before, &after, 7 * 86400).unwrap();
        // time_conf clamps at 0; stability 1.0; position 1.0
        let expected = 0.4 * 1.0 + 0.2 * 1.0;
        assert!((result.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        let before = point(0, 100.0);
        let after = point(86400, 500.0);
        let result = interpolate_between(&before, &after, 43200).unwrap();
        assert!(result.confidence >= 0.0 && result.confidence <= 1.0);
    }

    #[test]
    fn price_rounds_to_two_decimals() {
        let before = point(0, 1.0);
        let after = point(3, 2.0);
        let result = interpolate_between(&before, &after, 1).unwrap();
        assert_eq!(result.price, 1.33);
    }

    #[test]
    fn straddle_in_finds_neighbors() {
        let series = vec![point(100, 1.0), point(200, 2.0), point(300, 3.0)];

        let (before, after) = straddle_in(&series, 250);
        assert_eq!(before.map(|p| p.unix_ts), Some(200));
        assert_eq!(after.map(|p| p.unix_ts), Some(300));

        // Exact hit lands on both sides
        let (before, after) = straddle_in(&series, 200);
        assert_eq!(before.map(|p| p.unix_ts), Some(200));
        assert_eq!(after.map(|p| p.unix_ts), Some(200));

        // One second before the earliest point: no `before` side
        let (before, after) = straddle_in(&series, 99);
        assert!(before.is_none());
        assert_eq!(after.map(|p| p.unix_ts), Some(100));

        let (before, after) = straddle_in(&series, 400);
        assert_eq!(before.map(|p| p.unix_ts), Some(300));
        assert!(after.is_none());
    }
}
