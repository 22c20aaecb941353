// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

pub mod aggregation;
pub mod evidence;
pub mod policy;
pub mod runs;
pub mod tally;

pub use aggregation::{aggregate_region, AggregationStats, RegionTallies, TallyPool};
pub use evidence::{extract, ReadEvidence};
pub use policy::{CountingPolicy, CountingUnit, FootprintPolicy, SpanningPolicy, StrandPolicy};
pub use runs::{fetch_runs, locate_runs, HomopolymerRun};
pub use tally::{FrozenRunTally, Histogram, Inclusion, RunTally};
