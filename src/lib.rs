// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Estimation of homopolymer indel error rates from aligned reads.
//!
//! Reads covering homopolymer runs of the reference are classified by the homopolymer
//! length they observe. The resulting per-run tallies are pooled by base and length and
//! turned into error rates, optionally shrunk towards a seed model.

#[macro_use]
extern crate log;
#[cfg(test)]
#[macro_use]
extern crate approx;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate getset;
#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate strum_macros;

pub mod alignment;
pub mod cli;
pub mod counting;
pub mod errors;
pub mod estimation;
pub mod job;
pub mod reference;
pub mod utils;

pub use crate::counting::{CountingPolicy, FrozenRunTally, HomopolymerRun, TallyPool};
pub use crate::errors::Error;
pub use crate::estimation::{ErrorModelParameters, FitConfig, ParameterStore};
pub use crate::job::{Job, JobConfig, JobReport, JobState};
