use tracing::debug;

use crate::regions::{Capture, RawRegion, TextRegion};
use crate::settings::ScanTuning;

/// Retention window around a scan's capture offset. Asymmetric: more room
/// ahead of the viewport than behind it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionWindow {
    pub before: f64,
    pub after: f64,
}

impl EvictionWindow {
    pub fn new(before: f64, after: f64) -> Self {
        Self { before, after }
    }

    pub fn bounds(&self, scroll_offset: f64) -> (f64, f64) {
        (scroll_offset - self.before, scroll_offset + self.after)
    }

    pub fn retains(&self, scroll_offset: f64, absolute_y: f64) -> bool {
        let (min, max) = self.bounds(scroll_offset);
        absolute_y >= min && absolute_y <= max
    }
}

impl From<&ScanTuning> for EvictionWindow {
    fn from(tuning: &ScanTuning) -> Self {
        Self::new(tuning.evict_before, tuning.evict_after)
    }
}

/// Places a freshly returned batch on the page.
pub fn place_batch(batch: Vec<RawRegion>, capture: &Capture) -> Vec<TextRegion> {
    batch
        .into_iter()
        .map(|raw| TextRegion::place(raw, capture))
        .collect()
}

/// Evicts previous regions outside the window centred on the new capture,
/// then appends the new batch. Duplicates across scans are kept.
pub fn reconcile(
    previous: &[TextRegion],
    batch: Vec<RawRegion>,
    capture: &Capture,
    window: &EvictionWindow,
) -> Vec<TextRegion> {
    let mut next = previous
        .iter()
        .filter(|region| window.retains(capture.scroll_offset, region.absolute_y))
        .cloned()
        .collect::<Vec<_>>();
    let evicted = previous.len() - next.len();
    let placed = place_batch(batch, capture);
    debug!(
        "reconciled at offset {:.0}: kept {}, evicted {}, added {}",
        capture.scroll_offset,
        next.len(),
        evicted,
        placed.len()
    );
    next.extend(placed);
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::{NormalizedBox, RegionKind};

    const WINDOW: EvictionWindow = EvictionWindow {
        before: 2000.0,
        after: 3000.0,
    };

    fn raw(y_min: f64, text: &str) -> RawRegion {
        RawRegion {
            normalized_box: NormalizedBox::new(y_min, 0.0, (y_min + 50.0).min(1000.0), 500.0),
            translated_text: text.to_string(),
            original_text: None,
            kind: RegionKind::Speech,
            confidence: None,
        }
    }

    fn region_at(absolute_y: f64) -> TextRegion {
        let mut region = TextRegion::place(raw(0.0, "old"), &Capture::new(absolute_y, 800.0));
        region.absolute_y = absolute_y;
        region
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let offset = 5000.0;
        assert!(WINDOW.retains(offset, 3000.0));
        assert!(WINDOW.retains(offset, 8000.0));
        assert!(!WINDOW.retains(offset, 2999.9));
        assert!(!WINDOW.retains(offset, 8000.1));
    }

    #[test]
    fn first_scan_places_regions_from_top_of_viewport() {
        let capture = Capture::new(0.0, 800.0);
        let regions = reconcile(&[], vec![raw(100.0, "Hello")], &capture, &WINDOW);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].absolute_y, 0.0 + 0.1 * 800.0);
        assert_eq!(regions[0].translated_text, "Hello");
    }

    #[test]
    fn evicts_before_merging_using_new_capture() {
        let previous = vec![region_at(0.0), region_at(1500.0), region_at(9000.0)];
        let capture = Capture::new(3000.0, 800.0);
        let regions = reconcile(&previous, vec![raw(500.0, "new")], &capture, &WINDOW);
        let ys = regions.iter().map(|region| region.absolute_y).collect::<Vec<_>>();
        assert_eq!(ys, vec![1500.0, 3400.0]);
        assert_eq!(regions[0].id, previous[1].id);
    }

    #[test]
    fn empty_batch_still_evicts() {
        let previous = vec![region_at(100.0), region_at(7000.0)];
        let regions = reconcile(&previous, Vec::new(), &Capture::new(6000.0, 800.0), &WINDOW);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].absolute_y, 7000.0);
    }

    #[test]
    fn overlapping_scans_keep_duplicates() {
        let capture = Capture::new(1000.0, 800.0);
        let first = reconcile(&[], vec![raw(200.0, "same")], &capture, &WINDOW);
        let second = reconcile(&first, vec![raw(200.0, "same")], &capture, &WINDOW);
        assert_eq!(second.len(), 2);
        assert_ne!(second[0].id, second[1].id);
    }

    #[test]
    fn placement_is_deterministic() {
        let capture = Capture::new(2450.0, 731.0);
        let batch = vec![raw(0.0, "a"), raw(333.0, "b"), raw(1000.0, "c")];
        let first = reconcile(&[], batch.clone(), &capture, &WINDOW);
        let second = reconcile(&[], batch, &capture, &WINDOW);
        let ys = |regions: &[TextRegion]| {
            regions.iter().map(|region| region.absolute_y).collect::<Vec<_>>()
        };
        assert_eq!(ys(&first), ys(&second));
        assert_eq!(first[2].absolute_y, 2450.0 + 731.0);
    }
}
