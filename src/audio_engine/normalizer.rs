// FILE: src\audio_engine\normalizer.rs
// ====================================

use super::slot_store::SlotStore;
use crate::looper::SharedEngineState;
use rayon::prelude::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Peak level the mix may reach: 90% of the 16-bit ceiling.
pub const SAMPLE_MAX: f32 = 0.9 * 32768.0;

/// Derives the output gain from the combined peak of every track layer.
///
/// The scan is O(tracks × slots × chunk). It runs on the control thread
/// when a record button is released, never on the audio thread; the result
/// reaches the mixer through `SharedEngineState::set_gain`.
pub struct VolumeNormalizer {
    layers: Vec<Arc<SlotStore>>,
    shared: SharedEngineState,
}

impl VolumeNormalizer {
    pub fn new(layers: Vec<Arc<SlotStore>>, shared: SharedEngineState) -> Self {
        Self { layers, shared }
    }

    /// Largest absolute value of the per-position sum across all layers.
    /// Silent slots are skipped, which gives the same peak as summing them.
    pub fn peak(&self) -> i32 {
        let Some(first) = self.layers.first() else {
            return 0;
        };
        let chunk = first.chunk();
        (0..first.slots())
            .into_par_iter()
            .map_init(
                || vec![0i32; chunk],
                |acc, slot| {
                    acc.fill(0);
                    let mut any_live = false;
                    for layer in &self.layers {
                        if let Some(raw) = layer.live_slot(slot) {
                            any_live = true;
                            for (sum, sample) in acc.iter_mut().zip(raw) {
                                *sum += sample.load(Ordering::Relaxed) as i32;
                            }
                        }
                    }
                    if !any_live {
                        return 0;
                    }
                    acc.iter().map(|s| s.abs()).max().unwrap_or(0)
                },
            )
            .max()
            .unwrap_or(0)
    }

    /// Recomputes and publishes the gain. Leaves the current gain alone and
    /// returns `None` while no track holds a loop.
    pub fn recompute_gain(&self) -> Option<f32> {
        if !self.shared.tracks.iter().any(|t| t.is_initialized()) {
            return None;
        }
        let peak = self.peak();
        let gain = gain_for_peak(peak);
        log::debug!("peak = {}, output gain = {}", peak, gain);
        self.shared.set_gain(gain);
        Some(gain)
    }
}

pub fn gain_for_peak(peak: i32) -> f32 {
    if peak as f32 > SAMPLE_MAX {
        SAMPLE_MAX / peak as f32
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper::TrackStatus;

    fn store_with(slots: &[(usize, i16)]) -> Arc<SlotStore> {
        let store = SlotStore::new(4, 2);
        for &(slot, value) in slots {
            store.write(slot, &[value, value / 2]);
        }
        Arc::new(store)
    }

    #[test]
    fn test_gain_for_peak() {
        assert_eq!(gain_for_peak(0), 1.0);
        assert_eq!(gain_for_peak(29491), 1.0);
        let gain = gain_for_peak(40000);
        assert_eq!(gain, SAMPLE_MAX / 40000.0);
        assert!(gain * 40000.0 <= SAMPLE_MAX + 0.01);
    }

    #[test]
    fn test_peak_sums_layers_per_position() {
        let shared = SharedEngineState::new();
        let normalizer = VolumeNormalizer::new(
            vec![
                store_with(&[(1, 20000)]),
                store_with(&[(1, 15000), (2, -9000)]),
                store_with(&[(2, -9000)]),
                store_with(&[]),
            ],
            shared,
        );
        assert_eq!(normalizer.peak(), 35000);
    }

    #[test]
    fn test_invalidated_layers_do_not_count() {
        let loud = store_with(&[(0, 30000)]);
        let normalizer = VolumeNormalizer::new(
            vec![loud.clone(), store_with(&[(0, 10000)])],
            SharedEngineState::new(),
        );
        assert_eq!(normalizer.peak(), 40000);
        loud.invalidate_all();
        assert_eq!(normalizer.peak(), 10000);
    }

    #[test]
    fn test_recompute_publishes_gain() {
        let shared = SharedEngineState::new();
        let normalizer = VolumeNormalizer::new(
            vec![store_with(&[(3, 30000)]), store_with(&[(3, 10000)])],
            shared.clone(),
        );

        // nothing initialized yet: gain untouched
        assert_eq!(normalizer.recompute_gain(), None);
        assert_eq!(shared.gain(), 1.0);

        shared.tracks[0].publish(TrackStatus {
            initialized: true,
            ..Default::default()
        });
        let gain = normalizer.recompute_gain().unwrap();
        assert_eq!(gain, SAMPLE_MAX / 40000.0);
        assert_eq!(shared.gain(), gain);
    }

    #[test]
    fn test_quiet_mix_keeps_unity_gain() {
        let shared = SharedEngineState::new();
        shared.tracks[1].publish(TrackStatus {
            initialized: true,
            ..Default::default()
        });
        shared.set_gain(0.5);
        let normalizer =
            VolumeNormalizer::new(vec![store_with(&[(0, 1000)])], shared.clone());
        assert_eq!(normalizer.recompute_gain(), Some(1.0));
        assert_eq!(shared.gain(), 1.0);
    }
}
