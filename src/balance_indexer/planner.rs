//! Works out which slots need balances: the last slot of every calendar day in each configured
//! timezone, and the slots at which validators activated.
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::beacon_chain::{Activation, ActivationMap, Slot, ValidatorIndex, ValidatorSelection};

/// Slots to index this cycle, oldest first, with the validators each slot is indexed for.
pub type TargetSlots = BTreeMap<Slot, ValidatorSelection>;

// Daylight saving transitions skip at most a few hours, Pacific/Apia once skipped a whole day.
const MAX_LOCAL_GAP_MINUTES: i64 = 48 * 60;

/// Which instant a local time that happens twice resolves to.
#[derive(Clone, Copy)]
enum Repeated {
    Earliest,
    Latest,
}

/// Resolves a local wall clock time to an instant. Times skipped by a transition take the first
/// valid local time after them.
fn localize(timezone: &Tz, naive: NaiveDateTime, repeated: Repeated) -> Option<DateTime<Tz>> {
    (0..=MAX_LOCAL_GAP_MINUTES).find_map(|minutes| {
        match timezone.from_local_datetime(&(naive + Duration::minutes(minutes))) {
            LocalResult::Single(date_time) => Some(date_time),
            LocalResult::Ambiguous(earliest, latest) => match repeated {
                Repeated::Earliest => Some(earliest),
                Repeated::Latest => Some(latest),
            },
            LocalResult::None => None,
        }
    })
}

/// The first instant of a local day.
fn start_of_day(timezone: &Tz, date: NaiveDate) -> Option<DateTime<Tz>> {
    localize(timezone, date.and_time(NaiveTime::MIN), Repeated::Earliest)
}

/// The last second of a local day. When the day ends on a fall back transition 23:59:59 happens
/// twice, the second one ends the day.
fn end_of_day(timezone: &Tz, date: NaiveDate) -> Option<DateTime<Tz>> {
    localize(timezone, date.and_time(end_of_day_time()), Repeated::Latest)
}

fn end_of_day_time() -> NaiveTime {
    NaiveTime::MIN + Duration::seconds(24 * 60 * 60 - 1)
}

/// Instants to sample in one timezone: the start of the window, then 23:59:59 local time for
/// every day whose end falls inside it. The window runs from the start of `start_date` up to
/// the start of `end_date`, clipped to [genesis, now].
fn day_boundary_instants(
    timezone: &Tz,
    start_date: NaiveDate,
    end_date: NaiveDate,
    genesis: &DateTime<Utc>,
    now: &DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let (Some(start), Some(end)) = (
        start_of_day(timezone, start_date),
        start_of_day(timezone, end_date),
    ) else {
        return vec![];
    };

    let start = start.with_timezone(&Utc).max(*genesis);
    let end = end.with_timezone(&Utc).min(*now);

    if start > end {
        return vec![];
    }

    let mut instants = vec![start];
    let mut date = start.with_timezone(timezone).date_naive();

    while let Some(day_end) = end_of_day(timezone, date) {
        let day_end = day_end.with_timezone(&Utc);
        if day_end > end {
            break;
        }
        instants.push(day_end);

        match date.succ_opt() {
            Some(next_date) => date = next_date,
            None => break,
        }
    }

    instants
}

/// End-of-day slots across all timezones. Slots at or past the head are left out, the head may
/// still change.
pub fn plan_day_slots(
    start_date: NaiveDate,
    end_date: NaiveDate,
    timezones: &[Tz],
    genesis: &DateTime<Utc>,
    now: &DateTime<Utc>,
    head_slot: Slot,
) -> BTreeSet<Slot> {
    timezones
        .iter()
        .flat_map(|timezone| day_boundary_instants(timezone, start_date, end_date, genesis, now))
        .map(|instant| Slot::from_date_time_since(genesis, &instant))
        .filter(|slot| *slot < head_slot)
        .collect()
}

/// The earliest slot of the indexed history: the start of `start_date` in whichever timezone
/// reaches it first, no earlier than genesis.
pub fn window_start_slot(
    start_date: NaiveDate,
    timezones: &[Tz],
    genesis: &DateTime<Utc>,
) -> Slot {
    timezones
        .iter()
        .filter_map(|timezone| start_of_day(timezone, start_date))
        .map(|start| start.with_timezone(&Utc).max(*genesis))
        .map(|start| Slot::from_date_time_since(genesis, &start))
        .min()
        .unwrap_or(Slot::GENESIS)
}

/// Groups validators by the slot they activated at. Validators not yet activated, or whose
/// activation is unknown, are left out.
pub fn plan_activation_slots(activations: &ActivationMap) -> BTreeMap<Slot, Vec<ValidatorIndex>> {
    let mut activation_slots: BTreeMap<Slot, Vec<ValidatorIndex>> = BTreeMap::new();

    for (validator_index, activation) in activations {
        match activation {
            Activation::Activated(slot) => activation_slots
                .entry(*slot)
                .or_default()
                .push(*validator_index),
            Activation::NotYetActivated | Activation::Unknown => (),
        }
    }

    for validator_indexes in activation_slots.values_mut() {
        validator_indexes.sort_unstable();
    }

    activation_slots
}

/// Day slots are indexed for every selected validator, activation slots only for the
/// validators that activated there. A slot that is both is indexed for every selected validator.
/// Activation slots outside [window_start, head) are left out.
pub fn merge_target_slots(
    day_slots: &BTreeSet<Slot>,
    activation_slots: BTreeMap<Slot, Vec<ValidatorIndex>>,
    validators: &ValidatorSelection,
    window_start: Slot,
    head_slot: Slot,
) -> TargetSlots {
    let mut target_slots: TargetSlots = day_slots
        .iter()
        .map(|slot| (*slot, validators.clone()))
        .collect();

    for (slot, validator_indexes) in activation_slots {
        if slot < window_start.max(Slot::GENESIS) || slot >= head_slot {
            continue;
        }

        target_slots
            .entry(slot)
            .or_insert(ValidatorSelection::Indexes(validator_indexes));
    }

    target_slots
}
