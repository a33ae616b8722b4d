use std::ops::Range;

use crate::config::BatchSettings;

/// Partitions `lot_count` lots (in loader order) into solver waves.
///
/// At or below the threshold everything fits one wave. Above it, wave 0
/// takes the first `initial_size` lots and the tail is sliced into
/// contiguous waves of `step_size`. No re-sorting happens here.
pub fn partition_waves(lot_count: usize, batch: &BatchSettings) -> Vec<Range<usize>> {
    if lot_count == 0 {
        return Vec::new();
    }
    if lot_count <= batch.threshold {
        return vec![0..lot_count];
    }

    let initial = batch.initial_size.max(1).min(lot_count);
    let step = batch.step_size.max(1);

    let mut waves = vec![0..initial];
    let mut cursor = initial;
    while cursor < lot_count {
        let end = (cursor + step).min(lot_count);
        waves.push(cursor..end);
        cursor = end;
    }
    waves
}
