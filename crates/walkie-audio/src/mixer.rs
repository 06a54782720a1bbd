use std::sync::Arc;

use crate::registry::{DeviceId, DeviceRegistry};

/// Mix-minus mixer over a [`DeviceRegistry`].
///
/// For a requesting device it sums the latest window of every *other* active
/// device into a 32-bit accumulator and hard-clips the total to the 16-bit
/// range. Mixing only reads buffer state; concurrent mixes for different
/// devices never interfere with each other.
#[derive(Clone)]
pub struct Mixer {
    registry: Arc<DeviceRegistry>,
}

impl Mixer {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Mixed audio for `requesting_id`: the sum of every other active device's
    /// latest `num_frames` samples. Returns `None` if the requester is not
    /// registered.
    pub fn get_mixed_audio(&self, requesting_id: DeviceId, num_frames: usize) -> Option<Vec<i16>> {
        if !self.registry.contains(requesting_id) {
            tracing::debug!(device = %requesting_id, "mix requested for unknown device");
            return None;
        }
        let mut scratch = vec![0i32; num_frames.min(self.registry.buffer_capacity())];
        let mut out = vec![0i16; num_frames];
        self.mix_into(requesting_id, &mut out, &mut scratch).then_some(out)
    }

    /// Allocation-free mix into `out`, using `scratch` as the accumulator.
    ///
    /// `scratch` should hold at least the registry's buffer capacity; positions
    /// older than that carry no history and are written as silence anyway.
    /// Returns `false` (leaving `out` silent) if the requester is not registered.
    pub fn mix_into(&self, requesting_id: DeviceId, out: &mut [i16], scratch: &mut [i32]) -> bool {
        out.fill(0);
        let span = out.len().min(scratch.len());
        let acc = &mut scratch[..span];
        acc.fill(0);

        if !self.accumulate(requesting_id, acc) {
            return false;
        }
        let tail = out.len() - span;
        saturate_into(acc, &mut out[tail..]);
        true
    }

    /// Add every other active device's latest `acc.len()` samples into `acc`.
    ///
    /// The caller owns the accumulator so extra sources (local playback) can be
    /// summed in before the single saturation step.
    pub fn accumulate(&self, requesting_id: DeviceId, acc: &mut [i32]) -> bool {
        if !self.registry.contains(requesting_id) {
            return false;
        }
        self.registry
            .for_each_other(requesting_id, |buffer| buffer.accumulate_latest(acc));
        true
    }
}

/// Hard-clip each accumulated sample into the 16-bit range.
///
/// Applied once after the full sum so the clipping point does not depend on
/// the order devices were added in.
pub fn saturate_into(acc: &[i32], out: &mut [i16]) {
    for (dst, &sum) in out.iter_mut().zip(acc) {
        *dst = saturate(sum);
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation)] // lossless after the clamp
pub fn saturate(sum: i32) -> i16 {
    sum.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}
