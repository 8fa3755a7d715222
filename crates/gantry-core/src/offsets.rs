//! Work offsets and the stored reference points.

use crate::hal::{SettingsKey, SettingsStore, decode_axes, encode_axes};
use gantry_gcode::{Axes, MAX_AXES, MAX_COORD_SYSTEMS};
use tracing::warn;

const TOOL_AXIS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Offsets {
    /// One vector per work coordinate system, G54 first.
    pub coord_systems: Vec<Axes>,
    /// Index of the loaded system.
    pub active: u8,
    pub g28: Axes,
    pub g30: Axes,
    /// Stored G92 offset, survives G92.2.
    pub g92_permanent: Axes,
    /// G92 offset in effect.
    pub g92: Axes,
    /// Applied to Z while G43 is active.
    pub tool_length: f64,
    pub probe_position: Axes,
    pub probe_succeeded: bool,
    changed: bool,
}

impl Offsets {
    pub fn new(count: u8) -> Self {
        Self {
            coord_systems: vec![[0.0; MAX_AXES]; usize::from(count.min(MAX_COORD_SYSTEMS))],
            active: 0,
            g28: [0.0; MAX_AXES],
            g30: [0.0; MAX_AXES],
            g92_permanent: [0.0; MAX_AXES],
            g92: [0.0; MAX_AXES],
            tool_length: 0.0,
            probe_position: [0.0; MAX_AXES],
            probe_succeeded: false,
            changed: true,
        }
    }

    /// Reads every stored vector. Missing or malformed entries load as zero.
    pub fn load(count: u8, store: &dyn SettingsStore) -> Self {
        let mut offsets = Self::new(count);
        for (index, system) in offsets.coord_systems.iter_mut().enumerate() {
            *system = load_axes(store, SettingsKey::CoordSystem(index as u8));
        }
        offsets.g28 = load_axes(store, SettingsKey::G28);
        offsets.g30 = load_axes(store, SettingsKey::G30);
        offsets.g92_permanent = load_axes(store, SettingsKey::G92);
        offsets.g92 = offsets.g92_permanent;
        offsets
    }

    /// Drops the volatile offsets. Stored vectors are untouched.
    pub fn reset(&mut self) {
        self.active = 0;
        self.g92 = [0.0; MAX_AXES];
        self.tool_length = 0.0;
        self.changed = true;
    }

    /// Vector of the loaded coordinate system.
    pub fn coord_system(&self) -> Axes {
        self.stored(self.active)
    }

    pub fn stored(&self, index: u8) -> Axes {
        self.coord_systems
            .get(usize::from(index))
            .copied()
            .unwrap_or([0.0; MAX_AXES])
    }

    pub fn select(&mut self, index: u8) {
        self.active = index;
        self.changed = true;
    }

    pub fn set_tool_length(&mut self, offset: f64) {
        self.tool_length = offset;
        self.changed = true;
    }

    pub fn set_coord_system(&mut self, index: u8, axes: Axes, store: &mut dyn SettingsStore) {
        if let Some(system) = self.coord_systems.get_mut(usize::from(index)) {
            *system = axes;
            store.save(SettingsKey::CoordSystem(index), &encode_axes(&axes));
            self.changed = true;
        }
    }

    pub fn set_g28(&mut self, axes: Axes, store: &mut dyn SettingsStore) {
        self.g28 = axes;
        store.save(SettingsKey::G28, &encode_axes(&axes));
    }

    pub fn set_g30(&mut self, axes: Axes, store: &mut dyn SettingsStore) {
        self.g30 = axes;
        store.save(SettingsKey::G30, &encode_axes(&axes));
    }

    /// G92 sets both the active and the stored offset.
    pub fn set_g92(&mut self, axes: Axes, store: &mut dyn SettingsStore) {
        self.g92 = axes;
        self.g92_permanent = axes;
        store.save(SettingsKey::G92, &encode_axes(&axes));
        self.changed = true;
    }

    /// G92.1
    pub fn clear_g92(&mut self, store: &mut dyn SettingsStore) {
        self.g92_permanent = [0.0; MAX_AXES];
        store.save(SettingsKey::G92, &encode_axes(&self.g92_permanent));
        self.suspend_g92();
    }

    /// G92.2
    pub fn suspend_g92(&mut self) {
        self.g92 = [0.0; MAX_AXES];
        self.changed = true;
    }

    /// G92.3
    pub fn restore_g92(&mut self) {
        self.g92 = self.g92_permanent;
        self.changed = true;
    }

    /// Offset from machine to work coordinates. `tool_length_active` adds
    /// the tool length to Z.
    pub fn work_offset(&self, tool_length_active: bool) -> Axes {
        let system = self.coord_system();
        let mut offset = [0.0; MAX_AXES];
        for (i, slot) in offset.iter_mut().enumerate() {
            *slot = system[i] + self.g92[i];
        }
        if tool_length_active {
            offset[TOOL_AXIS] += self.tool_length;
        }
        offset
    }

    /// Erases every stored vector, `$RST=#`.
    pub fn erase(&mut self, store: &mut dyn SettingsStore) {
        for index in 0..self.coord_systems.len() {
            store.erase(SettingsKey::CoordSystem(index as u8));
        }
        store.erase(SettingsKey::G28);
        store.erase(SettingsKey::G30);
        store.erase(SettingsKey::G92);
        *self = Self::load(self.coord_systems.len() as u8, store);
    }

    /// Returns whether the work offset changed since the last call.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }
}

fn load_axes(store: &dyn SettingsStore, key: SettingsKey) -> Axes {
    let Some(bytes) = store.load(key) else {
        return [0.0; MAX_AXES];
    };
    decode_axes(&bytes).unwrap_or_else(|| {
        warn!(?key, len = bytes.len(), "discarding malformed stored offset");
        [0.0; MAX_AXES]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MemoryStore;

    #[test]
    fn persisted_vectors_reload() {
        let mut store = MemoryStore::new();
        let mut offsets = Offsets::new(6);
        offsets.set_coord_system(1, [1.0, 2.0, 3.0, 0.0, 0.0, 0.0], &mut store);
        offsets.set_g28([0.0, 0.0, 50.0, 0.0, 0.0, 0.0], &mut store);
        offsets.set_g92([5.0, 0.0, 0.0, 0.0, 0.0, 0.0], &mut store);

        let loaded = Offsets::load(6, &store);
        assert_eq!(loaded.stored(1)[..3], [1.0, 2.0, 3.0]);
        assert_eq!(loaded.g28[2], 50.0);
        assert_eq!(loaded.g92[0], 5.0);
        assert_eq!(loaded.g92_permanent[0], 5.0);
    }

    #[test]
    fn g92_variants() {
        let mut store = MemoryStore::new();
        let mut offsets = Offsets::new(6);
        offsets.set_g92([1.0; MAX_AXES], &mut store);
        offsets.suspend_g92();
        assert_eq!(offsets.g92, [0.0; MAX_AXES]);
        offsets.restore_g92();
        assert_eq!(offsets.g92, [1.0; MAX_AXES]);
        offsets.clear_g92(&mut store);
        offsets.restore_g92();
        assert_eq!(offsets.g92, [0.0; MAX_AXES]);
        assert_eq!(Offsets::load(6, &store).g92_permanent, [0.0; MAX_AXES]);
    }

    #[test]
    fn work_offset_sums() {
        let mut store = MemoryStore::new();
        let mut offsets = Offsets::new(6);
        offsets.set_coord_system(0, [10.0, 0.0, 1.0, 0.0, 0.0, 0.0], &mut store);
        offsets.set_g92([1.0, 0.0, 0.0, 0.0, 0.0, 0.0], &mut store);
        offsets.set_tool_length(2.5);
        let offset = offsets.work_offset(true);
        assert_eq!(offset[..3], [11.0, 0.0, 3.5]);
        assert_eq!(offsets.work_offset(false)[2], 1.0);
    }

    #[test]
    fn malformed_entries_load_as_zero() {
        let mut store = MemoryStore::new();
        store.save(SettingsKey::G30, &[1, 2, 3]);
        assert_eq!(Offsets::load(6, &store).g30, [0.0; MAX_AXES]);
    }

    #[test]
    fn erase_clears_storage() {
        let mut store = MemoryStore::new();
        let mut offsets = Offsets::new(6);
        offsets.set_coord_system(2, [1.0; MAX_AXES], &mut store);
        offsets.set_g30([4.0; MAX_AXES], &mut store);
        offsets.erase(&mut store);
        assert!(store.is_empty());
        assert_eq!(offsets.stored(2), [0.0; MAX_AXES]);
        assert_eq!(offsets.coord_systems.len(), 6);
    }

    #[test]
    fn change_tracking() {
        let mut offsets = Offsets::new(6);
        assert!(offsets.take_changed());
        assert!(!offsets.take_changed());
        offsets.select(2);
        assert!(offsets.take_changed());
    }
}
