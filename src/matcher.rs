//! Range matcher: which range configurations does a sample activate?

use crate::types::{Band, RangeConfiguration, TelemetrySample};

/// Resolve the band a range configuration listens to.
///
/// The explicit `band` field wins.  Older records only carry a free-text
/// `signal_name` such as `"Alpha (8 - 12 Hz)"`; for those the band keyword
/// occurring earliest in the name is used, ignoring case.  Names without any
/// keyword resolve to `None`.
pub fn band_of(range: &RangeConfiguration) -> Option<Band> {
    range.band.or_else(|| band_from_signal_name(&range.signal_name))
}

/// Keyword fallback decoder for free-text signal names.
pub fn band_from_signal_name(name: &str) -> Option<Band> {
    let lower = name.to_ascii_lowercase();
    Band::ALL
        .into_iter()
        .filter_map(|b| lower.find(b.keyword()).map(|pos| (pos, b)))
        .min_by_key(|&(pos, _)| pos)
        .map(|(_, b)| b)
}

/// Does `sample` activate `range`?
///
/// True iff the range resolves to a band and that band's power lies in
/// `[lower_range, upper_range]`, both ends inclusive.
pub fn is_active(range: &RangeConfiguration, sample: &TelemetrySample) -> bool {
    match band_of(range) {
        Some(band) => {
            let power = sample.power(band);
            range.lower_range <= power && power <= range.upper_range
        }
        None => false,
    }
}

/// Return the active subset of `ranges`, in input order.
///
/// Overlapping ranges may be active together; there is no priority between
/// them.  Ranges with an unknown band are silently excluded.
pub fn match_ranges(ranges: &[RangeConfiguration], sample: &TelemetrySample) -> Vec<RangeConfiguration> {
    ranges
        .iter()
        .filter(|r| is_active(r, sample))
        .cloned()
        .collect()
}

/// Fail-safe-off wrapper around [`match_ranges`]: nothing is active unless the
/// session is live and at least one sample has arrived.
pub fn match_live(
    ranges: &[RangeConfiguration],
    sample: Option<&TelemetrySample>,
    live: bool,
) -> Vec<RangeConfiguration> {
    match sample {
        Some(s) if live => match_ranges(ranges, s),
        _ => Vec::new(),
    }
}
