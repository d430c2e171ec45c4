//! Daily slot plan and area partition
//!
//! The partition is a pure function of the date: every slot of a day derives
//! the same shuffle from a seed hashed out of the date key, then takes its
//! share round-robin. Slots never see overlapping areas on the same day.

use crate::config::SlotEntry;
use crate::storage::date_to_key;
use crate::ConfigError;
use chrono::{NaiveDate, NaiveTime};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One daily slot with its parsed target time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub name: String,
    pub time: NaiveTime,
}

/// The day's slots ordered by target time
#[derive(Debug, Clone)]
pub struct SlotPlan {
    slots: Vec<Slot>,
}

impl SlotPlan {
    pub fn from_config(entries: &[SlotEntry]) -> Result<Self, ConfigError> {
        let mut slots = entries
            .iter()
            .map(|entry| {
                let time = NaiveTime::parse_from_str(&entry.time, "%H:%M").map_err(|e| {
                    ConfigError::Validation(format!(
                        "Slot '{}' has invalid time '{}': {}",
                        entry.name, entry.time, e
                    ))
                })?;
                Ok(Slot {
                    name: entry.name.clone(),
                    time,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        // Stable, so equal times keep config order
        slots.sort_by_key(|s| s.time);
        Ok(Self { slots })
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the latest slot whose target time is not after `time`
    pub fn current_slot(&self, time: NaiveTime) -> Option<&Slot> {
        self.slots.iter().rev().find(|s| s.time <= time)
    }
}

/// Derives the shuffle seed for a day
pub fn day_seed(date: NaiveDate) -> u64 {
    let digest = Sha256::digest(date_to_key(date).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Partitions `areas` across `slot_names` for `date`
///
/// Every slot name appears in the result, possibly with no areas when there
/// are more slots than areas.
pub fn assign_areas(
    date: NaiveDate,
    slot_names: &[String],
    areas: &[String],
) -> BTreeMap<String, Vec<String>> {
    let mut partition: BTreeMap<String, Vec<String>> = slot_names
        .iter()
        .map(|name| (name.clone(), Vec::new()))
        .collect();

    if slot_names.is_empty() {
        return partition;
    }

    let mut shuffled = areas.to_vec();
    let mut rng = StdRng::seed_from_u64(day_seed(date));
    shuffled.shuffle(&mut rng);

    for (i, area) in shuffled.into_iter().enumerate() {
        let slot = &slot_names[i % slot_names.len()];
        if let Some(bucket) = partition.get_mut(slot) {
            bucket.push(area);
        }
    }

    partition
}

/// The share of `slot_name` in the day's partition
pub fn areas_for_slot(
    date: NaiveDate,
    plan: &SlotPlan,
    areas: &[String],
    slot_name: &str,
) -> Option<Vec<String>> {
    assign_areas(date, &plan.names(), areas).remove(slot_name)
}
