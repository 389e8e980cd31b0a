use crate::model::*;

// ── Interval list arithmetic ─────────────────────────────────────
//
// Unit-agnostic: used with millisecond spans for availability queries and
// with minute spans inside the formulation.

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted, `to_remove` may overlap itself.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut cursor = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = to_remove[j];
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
            j += 1;
        }

        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}

/// Whether `span` overlaps anything in a sorted, disjoint list.
pub fn overlaps_any(disjoint: &[Span], span: &Span) -> bool {
    // The last interval starting before span.end is the only candidate.
    let idx = disjoint.partition_point(|s| s.start < span.end);
    idx > 0 && disjoint[idx - 1].end > span.start
}

/// Free gaps of a facility inside `window`, ignoring cancelled bookings.
pub fn free_gaps(facility: &FacilityState, window: &Span) -> Vec<Span> {
    let mut busy: Vec<Span> = facility
        .occupying(window)
        .map(|b| Span::new(b.span.start.max(window.start), b.span.end.min(window.end)))
        .collect();
    busy.sort_by_key(|s| s.start);
    subtract_intervals(&[*window], &busy)
}
