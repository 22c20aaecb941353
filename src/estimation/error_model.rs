// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Fitting of homopolymer indel error rates.
//!
//! Frozen run tallies are grouped by base and true homopolymer length. For each group,
//! the coverage weighted fraction of observations deviating from the true length is
//! the empirical indel rate. Low coverage groups are shrunk towards a seed model if
//! one is given. On top of the tabulated rates, a per-base trend of the logit rate over
//! the homopolymer length is fitted, which serves lengths without tabulated rates.

use std::collections::BTreeMap;

use bio::stats::Prob;
use bio_types::strand::ReqStrand;
use itertools::Itertools;

use crate::counting::aggregation::TallyPool;
use crate::counting::policy::{CountingPolicy, StrandPolicy};
use crate::counting::tally::Histogram;
use crate::errors::Error;
use crate::utils::homopolymers::sequenced_base;
use crate::utils::{cap_probability, expit, logit};

pub const DEFAULT_MIN_COVERAGE: u64 = 10;
pub const DEFAULT_SEED_WEIGHT: f64 = 0.5;
pub const DEFAULT_MIN_TREND_POINTS: usize = 2;

/// How the true length of a homopolymer run is determined.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum TruthMode {
    /// The reference length is the true length.
    Reference,
    /// The most frequently observed length is the true length.
    Distribution,
}

/// Shrinkage of low coverage groups towards the seed model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shrinkage {
    /// Groups with less coverage than this are blended with the seed.
    pub min_coverage: u64,
    /// Weight of the seed rate in the blend.
    pub seed_weight: f64,
}

impl Default for Shrinkage {
    fn default() -> Self {
        Shrinkage {
            min_coverage: DEFAULT_MIN_COVERAGE,
            seed_weight: DEFAULT_SEED_WEIGHT,
        }
    }
}

impl Shrinkage {
    fn blend(&self, raw: f64, seed: f64) -> f64 {
        (1.0 - self.seed_weight) * raw + self.seed_weight * seed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    pub truth: TruthMode,
    pub shrinkage: Shrinkage,
    /// Minimum number of lengths with a non-degenerate rate needed to fit a trend.
    pub min_trend_points: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            truth: TruthMode::Distribution,
            shrinkage: Shrinkage::default(),
            min_trend_points: DEFAULT_MIN_TREND_POINTS,
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<(), Error> {
        let weight = self.shrinkage.seed_weight;
        if !(0.0..=1.0).contains(&weight) {
            return Err(Error::InvalidShrinkageWeight { weight });
        }
        Ok(())
    }
}

/// Where a parameter set comes from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Fitted from the data alone, using the reference lengths as truth.
    Fitted,
    /// Fitted with a seed model.
    Seeded,
    /// Fitted from the data alone, using the observed length distribution as truth.
    TruthOverride,
}

/// Where a single coefficient comes from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum CoefficientSource {
    Empirical,
    /// Blended with the seed because of low coverage.
    Shrunk,
    /// Taken over from the seed.
    Inherited,
}

/// Error rates of homopolymers of a given base and length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters, CopyGetters)]
pub struct Coefficient {
    #[getset(get_copy = "pub")]
    base: char,
    #[getset(get_copy = "pub")]
    length: u32,
    /// Probability to observe a length different from the true length.
    #[getset(get_copy = "pub")]
    indel_rate: Prob,
    #[getset(get_copy = "pub")]
    insertion_rate: Prob,
    #[getset(get_copy = "pub")]
    deletion_rate: Prob,
    /// Counted observations, in the counting unit of the fit.
    #[getset(get_copy = "pub")]
    coverage: u64,
    #[getset(get_copy = "pub")]
    runs: u64,
    #[getset(get_copy = "pub")]
    source: CoefficientSource,
    /// Fraction of observations per length difference (observed - true).
    #[getset(get = "pub")]
    spectrum: BTreeMap<i32, f64>,
}

impl Coefficient {
    /// A coefficient without supporting observations, e.g. from a prior. The rates are
    /// checked by `validate`.
    pub fn new(base: char, length: u32, insertion_rate: f64, deletion_rate: f64) -> Self {
        Coefficient {
            base: base.to_ascii_uppercase(),
            length,
            indel_rate: Prob(insertion_rate + deletion_rate),
            insertion_rate: Prob(insertion_rate),
            deletion_rate: Prob(deletion_rate),
            coverage: 0,
            runs: 0,
            source: CoefficientSource::Empirical,
            spectrum: BTreeMap::new(),
        }
    }

    fn key(&self) -> (char, u32) {
        (self.base, self.length)
    }

    fn rates(&self) -> [Prob; 3] {
        [self.indel_rate, self.insertion_rate, self.deletion_rate]
    }

    /// Check that all rates are probabilities.
    pub fn validate(&self) -> Result<(), Error> {
        for rate in self.rates().iter() {
            if Prob::checked(**rate).is_err() {
                return Err(Error::InvalidCoefficient {
                    base: self.base,
                    length: self.length,
                    value: **rate,
                });
            }
        }
        Ok(())
    }

    fn inherited(&self) -> Self {
        Coefficient {
            coverage: 0,
            runs: 0,
            source: CoefficientSource::Inherited,
            ..self.clone()
        }
    }
}

/// Least squares fit of logit(indel rate) over homopolymer length for one base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct LengthTrend {
    base: char,
    intercept: f64,
    slope: f64,
    /// Number of lengths the trend was fitted on.
    points: usize,
}

impl LengthTrend {
    /// Fit a trend from (length, rate, weight) points. Rates of exactly 0 or 1 have no
    /// logit and are ignored.
    fn fit(base: char, points: &[(u32, Prob, u64)], min_points: usize) -> Option<Self> {
        let points = points
            .iter()
            .filter(|(_, rate, weight)| **rate > 0.0 && **rate < 1.0 && *weight > 0)
            .map(|(length, rate, weight)| (*length as f64, logit(*rate), *weight as f64))
            .collect_vec();
        let distinct_lengths = points.iter().map(|(x, _, _)| *x as u64).unique().count();
        if distinct_lengths < min_points.max(2) {
            return None;
        }

        let total_weight: f64 = points.iter().map(|(_, _, w)| w).sum();
        let mean_x = points.iter().map(|(x, _, w)| x * w).sum::<f64>() / total_weight;
        let mean_y = points.iter().map(|(_, y, w)| y * w).sum::<f64>() / total_weight;
        let sxx: f64 = points
            .iter()
            .map(|(x, _, w)| w * (x - mean_x).powi(2))
            .sum();
        let sxy: f64 = points
            .iter()
            .map(|(x, y, w)| w * (x - mean_x) * (y - mean_y))
            .sum();
        if sxx <= 0.0 {
            return None;
        }
        let slope = sxy / sxx;

        Some(LengthTrend {
            base,
            intercept: mean_y - slope * mean_x,
            slope,
            points: distinct_lengths,
        })
    }

    pub fn indel_rate(&self, length: u32) -> Prob {
        expit(self.intercept + self.slope * length as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters, CopyGetters)]
pub struct ErrorModelParameters {
    #[getset(get_copy = "pub")]
    provenance: Provenance,
    #[getset(get = "pub")]
    sample: Option<String>,
    /// Counting policy the tallies were created with.
    #[getset(get_copy = "pub")]
    policy: CountingPolicy,
    #[getset(get_copy = "pub")]
    fit_config: FitConfig,
    /// Sorted by base and length.
    #[getset(get = "pub")]
    coefficients: Vec<Coefficient>,
    #[getset(get = "pub")]
    trends: Vec<LengthTrend>,
}

impl ErrorModelParameters {
    /// Parameters consisting of the given coefficients only, e.g. to be used as a seed.
    pub fn from_coefficients(provenance: Provenance, coefficients: Vec<Coefficient>) -> Self {
        let mut coefficients = coefficients;
        coefficients.sort_by_key(|coefficient| coefficient.key());
        coefficients.dedup_by_key(|coefficient| coefficient.key());
        ErrorModelParameters {
            provenance,
            sample: None,
            policy: CountingPolicy::default(),
            fit_config: FitConfig::default(),
            coefficients,
            trends: Vec::new(),
        }
    }

    pub fn with_sample(mut self, sample: &str) -> Self {
        self.sample = Some(sample.to_owned());
        self
    }

    pub fn coefficient(&self, base: char, length: u32) -> Option<&Coefficient> {
        self.coefficients
            .binary_search_by_key(&(base, length), |coefficient| coefficient.key())
            .ok()
            .map(|i| &self.coefficients[i])
    }

    pub fn trend(&self, base: char) -> Option<&LengthTrend> {
        self.trends.iter().find(|trend| trend.base == base)
    }

    /// Indel rate of the given homopolymer, falling back to the trend of the base for
    /// lengths without tabulated rate.
    pub fn indel_rate(&self, base: char, length: u32) -> Option<Prob> {
        self.coefficient(base, length)
            .map(|coefficient| coefficient.indel_rate)
            .or_else(|| self.trend(base).map(|trend| trend.indel_rate(length)))
    }

    /// Sort the coefficients by base and length, as lookups require. Returns the key of
    /// a group with more than one coefficient, if any.
    pub(crate) fn sort_coefficients(&mut self) -> Result<(), (char, u32)> {
        self.coefficients.sort_by_key(|coefficient| coefficient.key());
        match self
            .coefficients
            .windows(2)
            .find(|pair| pair[0].key() == pair[1].key())
        {
            Some(pair) => Err(pair[0].key()),
            None => Ok(()),
        }
    }

    /// Check that the parameters are internally consistent.
    pub fn validate(&self) -> Result<(), Error> {
        for coefficient in &self.coefficients {
            coefficient.validate()?;
        }
        Ok(())
    }
}

/// The result of a fit: the parameters and the groups that could not be fitted.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct Fit {
    parameters: ErrorModelParameters,
    /// `Error::ModelFit` for each failed group.
    failures: Vec<Error>,
}

impl Fit {
    pub fn into_parameters(self) -> ErrorModelParameters {
        self.parameters
    }
}

/// Pooled observations of one (base, true length) group.
#[derive(Debug, Default)]
struct GroupCounts {
    coverage: u64,
    insertions: u64,
    deletions: u64,
    spectrum: BTreeMap<i32, u64>,
    runs: u64,
}

impl GroupCounts {
    fn add(&mut self, histogram: &Histogram, true_len: u32) {
        for (observed, count) in histogram {
            let delta = *observed as i64 - true_len as i64;
            self.coverage += count;
            if delta > 0 {
                self.insertions += count;
            } else if delta < 0 {
                self.deletions += count;
            }
            *self.spectrum.entry(delta as i32).or_insert(0) += count;
        }
        self.runs += 1;
    }

    /// Empirical indel, insertion and deletion rates.
    fn rates(&self) -> [f64; 3] {
        let coverage = self.coverage as f64;
        [
            (self.insertions + self.deletions) as f64 / coverage,
            self.insertions as f64 / coverage,
            self.deletions as f64 / coverage,
        ]
    }

    fn coefficient(
        &self,
        base: char,
        length: u32,
        rates: [Prob; 3],
        source: CoefficientSource,
    ) -> Coefficient {
        let coverage = self.coverage as f64;
        let [indel_rate, insertion_rate, deletion_rate] = rates;
        Coefficient {
            base,
            length,
            indel_rate,
            insertion_rate,
            deletion_rate,
            coverage: self.coverage,
            runs: self.runs,
            source,
            spectrum: self
                .spectrum
                .iter()
                .map(|(delta, count)| (*delta, *count as f64 / coverage))
                .collect(),
        }
    }
}

fn group_tallies(
    pool: &TallyPool,
    policy: &CountingPolicy,
    truth: TruthMode,
) -> BTreeMap<(char, u32), GroupCounts> {
    let mut groups: BTreeMap<(char, u32), GroupCounts> = BTreeMap::new();

    for tally in pool.tallies() {
        let run = tally.run();
        let true_len = match truth {
            TruthMode::Reference => run.len(),
            TruthMode::Distribution => tally.modal_len().unwrap_or_else(|| run.len()),
        };

        let mut contributions = Vec::with_capacity(2);
        match policy.strand {
            StrandPolicy::Ignore => contributions.push((run.base(), tally.counts(policy.unit))),
            StrandPolicy::Stratified => {
                // Reverse strand reads sequence the complementary base.
                contributions.push((
                    run.base(),
                    tally.strand_counts(ReqStrand::Forward, policy.unit),
                ));
                contributions.push((
                    sequenced_base(run.base(), true),
                    tally.strand_counts(ReqStrand::Reverse, policy.unit),
                ));
            }
        }

        for (base, histogram) in contributions {
            // Empty runs are kept in the reference base group, such that groups without
            // any coverage are visible to the fit.
            if histogram.is_empty() && base != run.base() {
                continue;
            }
            groups
                .entry((base as char, true_len))
                .or_insert_with(GroupCounts::default)
                .add(histogram, true_len);
        }
    }

    groups
}

/// Fit error rates to the given tallies.
///
/// Groups that cannot be fitted are reported as failures and fall back to the seed if
/// possible. Seed coefficients of groups without any observation are inherited.
pub fn fit(
    pool: &TallyPool,
    seed: Option<&ErrorModelParameters>,
    policy: &CountingPolicy,
    config: &FitConfig,
) -> Fit {
    let groups = group_tallies(pool, policy, config.truth);
    let shrinkage = config.shrinkage;

    let mut coefficients = BTreeMap::new();
    let mut failures = Vec::new();

    for ((base, length), counts) in &groups {
        let seeded = seed.and_then(|seed| seed.coefficient(*base, *length));
        let failure = |msg: String| Error::ModelFit {
            base: *base,
            length: *length,
            msg,
        };

        let candidate = if counts.coverage == 0 {
            match seeded {
                Some(seeded) => Ok(seeded.inherited()),
                None => Err(failure("no coverage and no seed to fall back to".to_owned())),
            }
        } else {
            let mut rates = counts.rates();
            let mut source = CoefficientSource::Empirical;
            if let Some(seeded) = seeded {
                if counts.coverage < shrinkage.min_coverage {
                    for (rate, seed_rate) in rates.iter_mut().zip(seeded.rates().iter()) {
                        *rate = shrinkage.blend(*rate, **seed_rate);
                    }
                    source = CoefficientSource::Shrunk;
                }
            }
            cap_rates(rates)
                .map(|rates| counts.coefficient(*base, *length, rates, source))
                .map_err(|value| {
                    failure(format!("estimated rate {} is not a probability", value))
                })
        };

        match candidate {
            Ok(coefficient) => {
                coefficients.insert((*base, *length), coefficient);
            }
            Err(e) => {
                warn!("{}", e);
                if let Some(seeded) = seeded {
                    coefficients.insert((*base, *length), seeded.inherited());
                }
                failures.push(e);
            }
        }
    }

    if let Some(seed) = seed {
        for seeded in seed.coefficients() {
            coefficients
                .entry(seeded.key())
                .or_insert_with(|| seeded.inherited());
        }
    }

    let coefficients = coefficients.into_iter().map(|(_, c)| c).collect_vec();
    let trends = fit_trends(&coefficients, config.min_trend_points);

    let provenance = if seed.is_some() {
        Provenance::Seeded
    } else if config.truth == TruthMode::Distribution {
        Provenance::TruthOverride
    } else {
        Provenance::Fitted
    };

    Fit {
        parameters: ErrorModelParameters {
            provenance,
            sample: None,
            policy: *policy,
            fit_config: *config,
            coefficients,
            trends,
        },
        failures,
    }
}

/// Clamp numerical overshoot of all rates to [0, 1]. Returns the offending value if a
/// rate is clearly outside.
fn cap_rates(rates: [f64; 3]) -> Result<[Prob; 3], f64> {
    let cap = |rate: f64| cap_probability(rate).ok_or(rate);
    Ok([cap(rates[0])?, cap(rates[1])?, cap(rates[2])?])
}

fn fit_trends(coefficients: &[Coefficient], min_points: usize) -> Vec<LengthTrend> {
    coefficients
        .iter()
        .filter(|coefficient| coefficient.source != CoefficientSource::Inherited)
        .group_by(|coefficient| coefficient.base)
        .into_iter()
        .filter_map(|(base, group)| {
            let points = group
                .map(|coefficient| (coefficient.length, coefficient.indel_rate, coefficient.coverage))
                .collect_vec();
            LengthTrend::fit(base, &points, min_points)
        })
        .collect()
}
