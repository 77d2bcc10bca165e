// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of top-causes.
//
// top-causes is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// top-causes is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with top-causes.  If
// not, see <http://www.gnu.org/licenses/>.

//! # top-causes metrics
//!
//! top-causes uses [OpenTelemetry] to collect & export metrics. OTel advises re-using instruments
//! rather than creating them on each use, which raises the question of where to keep them.
//!
//! [OpenTelemetry]: https://docs.rs/opentelemetry/latest/opentelemetry/index.html
//!
//! This module uses David Tolnay's [inventory] crate to avoid a centralized list. At the metric
//! collection site, register the metric name:
//!
//! ```ignore
//! inventory::submit!(metrics::Registration::new("causes.top.successes", Sort::IntegralCounter));
//! // ...
//! async fn handler() {
//!     // ...
//!     counter_add!(state.instruments, "causes.top.successes", 1, &[]);
//! }
//! ```
//!
//! Create one [Instruments] instance & attach it to the application state. Its constructor checks
//! for name clashes & "pre-builds" every registered instrument.
//!
//! Looking up a name that wasn't registered, or that names a different sort of instrument, is a
//! logic error & panics.

use std::collections::{hash_map::Entry, HashMap, HashSet};

use opentelemetry::{
    global,
    metrics::{Counter, Gauge},
    KeyValue,
};

/// Instrument type
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Sort {
    /// Corresponds to `Counter<u64>`
    IntegralCounter,
    /// `Gauge<u64>`
    IntegralGauge,
}

/// The type of thing being inventoried
///
/// Register a metric by name & type using
///
/// ```ignore
/// inventory::submit!{metrics::Registration::new("causes.auth.successes", Sort::IntegralCounter)}
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Registration {
    name: &'static str,
    sort: Sort,
}

impl Registration {
    pub const fn new(name: &'static str, sort: Sort) -> Registration {
        Registration { name, sort }
    }
    pub fn name(&self) -> String {
        self.name.to_string()
    }
    pub fn sort(&self) -> Sort {
        self.sort
    }
}

inventory::collect!(Registration);

/// Panic if any metric name has been registered twice
///
/// Call this early, at startup.
pub fn check_metric_registrations() {
    let mut names: HashSet<String> = HashSet::new();
    IntoIterator::into_iter(inventory::iter::<Registration>).for_each(|reg| {
        if !names.insert(reg.name()) {
            panic!("The metric name {} was registered twice", reg.name());
        }
    });
}

enum Instrument {
    CounterU64(Counter<u64>),
    GaugeU64(Gauge<u64>),
}

/// Container for OTel instruments
pub struct Instruments {
    map: HashMap<String, Instrument>,
}

impl Instruments {
    pub fn new(prefix: &'static str) -> Instruments {
        let mut m: HashMap<String, Instrument> = HashMap::new();
        let meter = global::meter(prefix);
        // Building every registered instrument up front means `add` and `record` don't need a
        // `&mut self`, so an `Instruments` can live in an `Arc`.
        IntoIterator::into_iter(inventory::iter::<Registration>).for_each(|reg| {
            let name = reg.name();
            match m.entry(reg.name()) {
                Entry::Occupied(_occupied_entry) => {
                    panic!("The metric name {} was used twice", name)
                }
                Entry::Vacant(vacant_entry) => {
                    vacant_entry.insert(match reg.sort() {
                        Sort::IntegralCounter => {
                            Instrument::CounterU64(meter.u64_counter(name).build())
                        }
                        Sort::IntegralGauge => Instrument::GaugeU64(meter.u64_gauge(name).build()),
                    });
                }
            }
        });

        Instruments { map: m }
    }
    // panics if `name` doesn't name a counter
    pub fn add(&self, name: &str, count: u64, attributes: &[KeyValue]) {
        if let Some(Instrument::CounterU64(c)) = self.map.get(name) {
            c.add(count, attributes);
        } else {
            panic!("{} does not name a counter", name);
        }
    }
    // panics if `name` doesn't name a gauge
    pub fn recordu(&self, name: &str, value: u64, attributes: &[KeyValue]) {
        if let Some(Instrument::GaugeU64(g)) = self.map.get(name) {
            g.record(value, attributes);
        } else {
            panic!("{} does not name a gauge", name);
        }
    }
}

#[macro_export]
macro_rules! counter_add {
    ($instr:expr, $name:expr, $count:expr, $attrs:expr) => {
        $instr.add($name, $count, $attrs);
    };
}

#[macro_export]
macro_rules! gauge_setu {
    ($instr:expr, $name:expr, $value:expr, $attrs:expr) => {
        $instr.recordu($name, $value, $attrs);
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registrations_are_unique() {
        check_metric_registrations();
    }

    #[test]
    fn registered_counters_resolve() {
        // With no meter provider installed these are no-ops, but the lookups must still succeed
        let instruments = Instruments::new("top-causes-test");
        counter_add!(instruments, "causes.top.successes", 1, &[]);
        gauge_setu!(instruments, "causes.top.last_returned", 3, &[]);
    }

    #[test]
    #[should_panic]
    fn unregistered_counter() {
        let instruments = Instruments::new("top-causes-test");
        counter_add!(instruments, "no.such.metric", 1, &[]);
    }
}
