// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Orchestration of a complete estimation job.
//!
//! A job locates the homopolymer runs of all regions, aggregates the reads of each
//! region (concurrently if multiple threads are requested), joins the per-region
//! tallies, fits the error model once on the joined tallies and finally persists it.
//! Any fatal error moves the job to `JobState::Failed`. Since saving is the last step,
//! a failed job never leaves (partial) output behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::alignment::{merge_sorted, AlignmentSource, BamSource, MemorySource};
use crate::counting::aggregation::{aggregate_region, RegionTallies, TallyPool};
use crate::counting::policy::CountingPolicy;
use crate::counting::runs::{fetch_runs, HomopolymerRun};
use crate::errors::Error;
use crate::estimation::error_model::{fit, ErrorModelParameters, FitConfig};
use crate::estimation::store::ParameterStore;
use crate::reference::{Buffer, MemoryReference, ReferenceSource};
use crate::utils::regions::merge_regions;
use crate::utils::{CancellationToken, Region};

/// Number of contigs kept in memory by the reference buffer.
pub const REFERENCE_CACHE_CAPACITY: usize = 3;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Init,
    LocatingRuns,
    Aggregating,
    Fitting,
    Persisted,
    Done,
    Failed,
}

/// Configuration of a job, fixed for its entire duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub sample: String,
    pub regions: Vec<Region>,
    pub policy: CountingPolicy,
    pub fit: FitConfig,
    /// Identifier of the parameter set to seed the fit with.
    pub seed: Option<String>,
    /// Identifier to store the fitted parameters under.
    pub output: String,
    pub threads: usize,
    pub timeout: Option<Duration>,
}

impl JobConfig {
    pub fn new(sample: &str, regions: Vec<Region>, output: &str) -> Self {
        JobConfig {
            sample: sample.to_owned(),
            regions,
            policy: CountingPolicy::default(),
            fit: FitConfig::default(),
            seed: None,
            output: output.to_owned(),
            threads: 1,
            timeout: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(Error::EmptyRegions.into());
        }
        if let Some(region) = self.regions.iter().find(|region| region.is_empty()) {
            return Err(Error::InvalidRegion {
                spec: region.to_string(),
            }
            .into());
        }
        if self.threads == 0 {
            return Err(Error::InvalidThreads.into());
        }
        self.fit.validate()?;
        Ok(())
    }
}

/// Access to the reference and alignments of a sample.
///
/// Alignment sources are opened per aggregation worker, while the reference is shared.
pub trait Sources: Sync {
    fn reference(&self) -> &dyn ReferenceSource;

    /// Open all alignment sources of the sample.
    fn alignments(&self) -> Result<Vec<Box<dyn AlignmentSource>>>;
}

/// Indexed BAM/CRAM files together with an indexed FASTA reference.
pub struct BamSources {
    bams: Vec<PathBuf>,
    reference: Buffer,
}

impl BamSources {
    pub fn new<P: AsRef<Path>>(bams: &[P], reference: impl AsRef<Path>) -> Result<Self> {
        if bams.is_empty() {
            return Err(Error::EmptyAlignments.into());
        }
        Ok(BamSources {
            bams: bams.iter().map(|bam| bam.as_ref().to_owned()).collect(),
            reference: Buffer::from_path(reference.as_ref(), REFERENCE_CACHE_CAPACITY)?,
        })
    }
}

impl Sources for BamSources {
    fn reference(&self) -> &dyn ReferenceSource {
        &self.reference
    }

    fn alignments(&self) -> Result<Vec<Box<dyn AlignmentSource>>> {
        self.bams
            .iter()
            .map(|path| {
                let mut bam = BamSource::from_path(path)?;
                bam.set_reference(self.reference.reference_path())?;
                Ok(Box::new(bam) as Box<dyn AlignmentSource>)
            })
            .collect()
    }
}

/// Reference and alignments held in memory.
#[derive(Debug, Clone, Default, new)]
pub struct MemorySources {
    reference: MemoryReference,
    alignments: Vec<MemorySource>,
}

impl Sources for MemorySources {
    fn reference(&self) -> &dyn ReferenceSource {
        &self.reference
    }

    fn alignments(&self) -> Result<Vec<Box<dyn AlignmentSource>>> {
        if self.alignments.is_empty() {
            return Err(Error::EmptyAlignments.into());
        }
        Ok(self
            .alignments
            .iter()
            .cloned()
            .map(|source| Box::new(source) as Box<dyn AlignmentSource>)
            .collect())
    }
}

/// Summary of a job, logged at its end and optionally written as JSON.
#[derive(Debug, Clone, Serialize, Getters, CopyGetters)]
pub struct JobReport {
    #[getset(get = "pub")]
    program: String,
    #[getset(get = "pub")]
    version: String,
    #[getset(get = "pub")]
    sample: String,
    #[getset(get_copy = "pub")]
    state: JobState,
    /// All states the job went through.
    #[getset(get = "pub")]
    transitions: Vec<JobState>,
    #[getset(get = "pub")]
    error: Option<String>,
    #[getset(get_copy = "pub")]
    regions: usize,
    #[getset(get_copy = "pub")]
    runs: usize,
    #[getset(get_copy = "pub")]
    runs_without_coverage: usize,
    #[getset(get_copy = "pub")]
    reads: u64,
    #[getset(get = "pub")]
    filtered: BTreeMap<&'static str, u64>,
    #[getset(get_copy = "pub")]
    malformed: u64,
    #[getset(get_copy = "pub")]
    evidence: u64,
    #[getset(get_copy = "pub")]
    included: u64,
    #[getset(get_copy = "pub")]
    nonspanning: u64,
    #[getset(get_copy = "pub")]
    duplicates: u64,
    #[getset(get_copy = "pub")]
    spliced: u64,
    #[getset(get_copy = "pub")]
    coefficients: usize,
    #[getset(get = "pub")]
    failed_groups: Vec<String>,
    #[getset(get_copy = "pub")]
    wall_time_secs: f64,
}

impl JobReport {
    fn new(sample: &str) -> Self {
        JobReport {
            program: env!("CARGO_PKG_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            sample: sample.to_owned(),
            state: JobState::Init,
            transitions: vec![JobState::Init],
            error: None,
            regions: 0,
            runs: 0,
            runs_without_coverage: 0,
            reads: 0,
            filtered: BTreeMap::new(),
            malformed: 0,
            evidence: 0,
            included: 0,
            nonspanning: 0,
            duplicates: 0,
            spliced: 0,
            coefficients: 0,
            failed_groups: Vec::new(),
            wall_time_secs: 0.0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == JobState::Done
    }

    fn record_pool(&mut self, pool: &TallyPool) {
        let stats = pool.stats();
        self.regions = pool.regions().len();
        self.runs = pool.len();
        self.runs_without_coverage = pool
            .tallies()
            .iter()
            .filter(|tally| tally.is_empty())
            .count();
        self.reads = stats.reads;
        self.filtered = stats.filtered_by_reason();
        self.malformed = stats.malformed;
        self.evidence = stats.evidence;
        self.included = stats.included;
        self.nonspanning = stats.nonspanning;
        self.duplicates = stats.duplicates;
        self.spliced = stats.spliced;
    }

    pub fn log(&self) {
        info!("{} {}", self.program, self.version);
        info!("Sample: {}", self.sample);
        info!("Final state: {}", self.state);
        if let Some(error) = &self.error {
            info!("Error: {}", error);
        }
        info!("Regions: {}", self.regions);
        info!(
            "Homopolymer runs: {} ({} without coverage)",
            self.runs, self.runs_without_coverage
        );
        info!("Reads: {}", self.reads);
        for (reason, count) in &self.filtered {
            info!("    - filtered ({}): {}", reason, count);
        }
        info!("    - malformed: {}", self.malformed);
        info!("Evidence: {}", self.evidence);
        info!("    - included: {}", self.included);
        info!("    - excluded as nonspanning: {}", self.nonspanning);
        info!("    - excluded as duplicate read: {}", self.duplicates);
        info!("    - excluded as spliced: {}", self.spliced);
        info!("Coefficients: {}", self.coefficients);
        if !self.failed_groups.is_empty() {
            info!("Failed groups: {}", self.failed_groups.join(", "));
        }
        info!("Wall time: {:.2}s", self.wall_time_secs);
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = fs::File::create(path.as_ref())
            .with_context(|| format!("Failed to create {}", path.as_ref().display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

pub struct Job<'a> {
    config: JobConfig,
    sources: &'a dyn Sources,
    store: &'a dyn ParameterStore,
    cancellation: CancellationToken,
    report: JobReport,
}

impl<'a> Job<'a> {
    pub fn new(config: JobConfig, sources: &'a dyn Sources, store: &'a dyn ParameterStore) -> Self {
        let cancellation = match config.timeout {
            Some(timeout) => CancellationToken::with_timeout(timeout),
            None => CancellationToken::new(),
        };
        let report = JobReport::new(&config.sample);
        Job {
            config,
            sources,
            store,
            cancellation,
            report,
        }
    }

    /// Use the given token for cancelling the job, instead of the timeout of the config.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn state(&self) -> JobState {
        self.report.state
    }

    fn transition(&mut self, state: JobState) {
        info!("Job {} -> {}", self.report.state, state);
        self.report.state = state;
        self.report.transitions.push(state);
    }

    /// Run the job to completion. The returned report tells whether it succeeded.
    pub fn run(mut self) -> JobReport {
        let start = Instant::now();
        if let Err(e) = self.execute() {
            error!("{:#}", e);
            self.report.error = Some(format!("{:#}", e));
            self.transition(JobState::Failed);
        }
        self.report.wall_time_secs = start.elapsed().as_secs_f64();
        self.report
    }

    fn execute(&mut self) -> Result<()> {
        self.config.validate()?;
        let seed = self
            .config
            .seed
            .as_ref()
            .map(|id| {
                info!("Loading seed parameters {}.", id);
                self.store.load(id)
            })
            .transpose()?;

        self.transition(JobState::LocatingRuns);
        let regions = merge_regions(self.config.regions.clone());
        let located = self.locate_runs(&regions)?;
        info!(
            "Located {} homopolymer runs in {} regions.",
            located.iter().map(|(_, runs)| runs.len()).sum::<usize>(),
            located.len()
        );

        self.transition(JobState::Aggregating);
        let results = self.aggregate(located)?;
        // All regions have been aggregated, fitting may begin.
        let pool = TallyPool::join(results);
        self.report.record_pool(&pool);
        info!(
            "Aggregated {} reads into {} tallies.",
            pool.stats().reads,
            pool.len()
        );

        self.transition(JobState::Fitting);
        let fit = fit(&pool, seed.as_ref(), &self.config.policy, &self.config.fit);
        for failure in fit.failures() {
            self.report.failed_groups.push(failure.to_string());
        }
        if !fit.failures().is_empty() {
            warn!(
                "Unable to fit {} homopolymer groups, see above.",
                fit.failures().len()
            );
        }
        let parameters: ErrorModelParameters =
            fit.into_parameters().with_sample(&self.config.sample);
        self.report.coefficients = parameters.coefficients().len();

        self.cancellation.check()?;
        self.store.save(&self.config.output, &parameters)?;
        self.transition(JobState::Persisted);
        info!("Saved parameters to {}.", self.config.output);

        self.transition(JobState::Done);
        Ok(())
    }

    fn locate_runs(&self, regions: &[Region]) -> Result<Vec<(Region, Vec<HomopolymerRun>)>> {
        let reference = self.sources.reference();
        regions
            .iter()
            .map(|region| {
                self.cancellation.check()?;
                let runs = fetch_runs(reference, region)?;
                debug!("Located {} runs in {}.", runs.len(), region);
                Ok((region.clone(), runs))
            })
            .collect()
    }

    fn aggregate(
        &self,
        located: Vec<(Region, Vec<HomopolymerRun>)>,
    ) -> Result<Vec<RegionTallies>> {
        let sources = self.sources;
        let policy = &self.config.policy;
        let cancellation = &self.cancellation;
        let aggregate = |(region, runs): (Region, Vec<HomopolymerRun>)| {
            aggregate_sources(sources, &region, runs, policy, cancellation)
        };

        if self.config.threads > 1 {
            info!("Aggregating with {} threads.", self.config.threads);
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.threads)
                .build()?;
            pool.install(|| located.into_par_iter().map(aggregate).collect())
        } else {
            located.into_iter().map(aggregate).collect()
        }
    }
}

fn aggregate_sources(
    sources: &dyn Sources,
    region: &Region,
    runs: Vec<HomopolymerRun>,
    policy: &CountingPolicy,
    cancellation: &CancellationToken,
) -> Result<RegionTallies> {
    let mut alignments = sources.alignments()?;
    let reads = alignments
        .iter_mut()
        .map(|source| source.fetch(region))
        .collect::<Result<Vec<_>>>()?;
    let result = aggregate_region(region, runs, merge_sorted(reads), policy, cancellation)?;
    debug!(
        "Aggregated {} reads in {}.",
        result.stats().reads,
        region
    );
    Ok(result)
}
