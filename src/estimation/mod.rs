// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

pub mod error_model;
pub mod store;

pub use error_model::{
    fit, Coefficient, CoefficientSource, ErrorModelParameters, Fit, FitConfig, LengthTrend,
    Provenance, Shrinkage, TruthMode,
};
pub use store::{JsonFileStore, MemoryStore, ParameterStore, FORMAT_VERSION};
