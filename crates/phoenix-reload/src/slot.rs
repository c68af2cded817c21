//! Blue/green deployment slots
//!
//! Two slots hold loaded units side by side. The active slot is selected by
//! a single atomic index: it is written once per transaction under the
//! transaction lock and read without locking everywhere else.

use dashmap::DashMap;
use phoenix_kernel::SlotName;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::loader::LoadedUnit;

/// One of the two parallel unit containers
#[derive(Debug)]
pub struct DeploymentSlot {
    name: SlotName,
    units: DashMap<String, Arc<LoadedUnit>>,
}

impl DeploymentSlot {
    fn new(name: SlotName) -> Self {
        Self {
            name,
            units: DashMap::new(),
        }
    }

    pub fn name(&self) -> SlotName {
        self.name
    }

    pub fn get(&self, unit_id: &str) -> Option<Arc<LoadedUnit>> {
        self.units.get(unit_id).map(|u| Arc::clone(u.value()))
    }

    pub fn contains(&self, unit_id: &str) -> bool {
        self.units.contains_key(unit_id)
    }

    pub fn unit_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.units.iter().map(|u| u.key().clone()).collect();
        ids.sort();
        ids
    }

    /// unit id -> checksum of every unit in the slot
    pub fn checksums(&self) -> BTreeMap<String, String> {
        self.units
            .iter()
            .map(|u| (u.key().clone(), u.value().checksum.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub(crate) fn insert(&self, unit: Arc<LoadedUnit>) {
        self.units.insert(unit.unit_id.clone(), unit);
    }

    pub(crate) fn clear(&self) {
        self.units.clear();
    }

    /// Replace this slot's contents with a copy of `other`
    pub(crate) fn reset_from(&self, other: &DeploymentSlot) {
        self.units.clear();
        for entry in other.units.iter() {
            self.units.insert(entry.key().clone(), Arc::clone(entry.value()));
        }
    }
}

/// The blue/green pair and the active pointer
#[derive(Debug)]
pub struct SlotSet {
    slots: [DeploymentSlot; 2],
    active: AtomicU8,
}

impl Default for SlotSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotSet {
    /// Both slots empty, BLUE active
    pub fn new() -> Self {
        Self {
            slots: [
                DeploymentSlot::new(SlotName::Blue),
                DeploymentSlot::new(SlotName::Green),
            ],
            active: AtomicU8::new(SlotName::Blue.index() as u8),
        }
    }

    pub fn active_name(&self) -> SlotName {
        SlotName::from_index(self.active.load(Ordering::Acquire) as usize)
    }

    pub fn active(&self) -> &DeploymentSlot {
        self.slot(self.active_name())
    }

    pub fn inactive(&self) -> &DeploymentSlot {
        self.slot(self.active_name().other())
    }

    pub fn slot(&self, name: SlotName) -> &DeploymentSlot {
        &self.slots[name.index()]
    }

    /// Lock-free lookup in the active slot
    pub fn get_active(&self, unit_id: &str) -> Option<Arc<LoadedUnit>> {
        self.active().get(unit_id)
    }

    /// Point readers at `name`; returns the previously active slot
    pub(crate) fn set_active(&self, name: SlotName) -> SlotName {
        SlotName::from_index(self.active.swap(name.index() as u8, Ordering::AcqRel) as usize)
    }
}
