// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use structopt::StructOpt;

use crate::counting::policy::CountingPolicy;
use crate::estimation::error_model::{
    FitConfig, Shrinkage, TruthMode, DEFAULT_MIN_TREND_POINTS,
};
use crate::estimation::store::JsonFileStore;
use crate::job::{BamSources, Job, JobConfig};
use crate::utils::regions::regions_from_bed;
use crate::utils::Region;

#[derive(Debug, StructOpt, Clone)]
#[structopt(
    name = "hpolfit",
    about = "Estimate homopolymer indel error rates of a sequencing platform from aligned reads.",
    setting = structopt::clap::AppSettings::ColoredHelp
)]
pub enum Hpolfit {
    #[structopt(
        name = "estimate",
        about = "Fit homopolymer indel error rates to the reads covering the homopolymers of the given regions.",
        usage = "hpolfit estimate --bam sample.bam --reference reference.fasta --region chr20 --sample NA12878 --output params.json",
        setting = structopt::clap::AppSettings::ColoredHelp
    )]
    Estimate {
        #[structopt(
            long = "bam",
            required = true,
            parse(from_os_str),
            help = "Indexed BAM/CRAM file with reads of the sample. Can be given multiple times."
        )]
        bams: Vec<PathBuf>,
        #[structopt(
            long,
            parse(from_os_str),
            help = "FASTA file with reference genome. Has to be indexed with samtools faidx."
        )]
        reference: PathBuf,
        #[structopt(
            long = "region",
            help = "Region to sample homopolymers from (CHROM or CHROM:START-END, 1-based, inclusive). Can be given multiple times."
        )]
        regions: Vec<Region>,
        #[structopt(
            long = "regions-bed",
            parse(from_os_str),
            help = "BED file with regions to sample homopolymers from."
        )]
        regions_bed: Option<PathBuf>,
        #[structopt(long, help = "Name of the sample.")]
        sample: String,
        #[structopt(
            long,
            parse(from_os_str),
            help = "JSON file to write the fitted parameters to."
        )]
        output: PathBuf,
        #[structopt(
            long,
            parse(from_os_str),
            help = "JSON file with previously fitted parameters to seed the fit with. Rates of \
                    homopolymers with low coverage are shrunk towards the seed."
        )]
        seed: Option<PathBuf>,
        #[structopt(
            long = "reference-as-truth",
            help = "Take the reference length of a homopolymer as its true length, instead of \
                    the most frequently observed length."
        )]
        reference_as_truth: bool,
        #[structopt(
            long = "use-strand",
            help = "Use the strand of alignments to determine the homopolymer base (i.e. \
                    reverse strand reads count for the complementary base)."
        )]
        use_strand: bool,
        #[structopt(
            long = "naive-footprint",
            help = "Project reads onto the reference by their length instead of using the \
                    CIGAR string to determine the covered reference bases."
        )]
        naive_footprint: bool,
        #[structopt(
            long = "not-require-spanning",
            help = "Also count reads that do not align beyond both ends of a homopolymer."
        )]
        not_require_spanning: bool,
        #[structopt(
            long = "count-reads",
            help = "Count each read once per homopolymer, instead of counting covered bases."
        )]
        count_reads: bool,
        #[structopt(
            long = "min-coverage",
            default_value = "10",
            help = "Homopolymer groups with less coverage are shrunk towards the seed."
        )]
        min_coverage: u64,
        #[structopt(
            long = "seed-weight",
            default_value = "0.5",
            help = "Weight of the seed rate when shrinking low coverage homopolymer groups."
        )]
        seed_weight: f64,
        #[structopt(
            long,
            default_value = "1",
            help = "Number of threads to aggregate regions with."
        )]
        threads: usize,
        #[structopt(
            long = "timeout-secs",
            help = "Abort the job if it takes longer than the given number of seconds."
        )]
        timeout_secs: Option<u64>,
        #[structopt(
            long,
            parse(from_os_str),
            help = "Write statistics about the run to the given JSON file."
        )]
        stats: Option<PathBuf>,
        #[structopt(short, long, help = "Print debugging information.")]
        verbose: bool,
    },
}

impl Hpolfit {
    pub fn verbose(&self) -> bool {
        match self {
            Hpolfit::Estimate { verbose, .. } => *verbose,
        }
    }
}

pub fn run(opt: Hpolfit) -> Result<()> {
    match opt {
        Hpolfit::Estimate {
            bams,
            reference,
            mut regions,
            regions_bed,
            sample,
            output,
            seed,
            reference_as_truth,
            use_strand,
            naive_footprint,
            not_require_spanning,
            count_reads,
            min_coverage,
            seed_weight,
            threads,
            timeout_secs,
            stats,
            ..
        } => {
            if let Some(regions_bed) = regions_bed {
                regions.extend(regions_from_bed(regions_bed)?);
            }

            let config = JobConfig {
                sample,
                regions,
                policy: CountingPolicy::from_flags(
                    use_strand,
                    naive_footprint,
                    not_require_spanning,
                    count_reads,
                ),
                fit: FitConfig {
                    truth: if reference_as_truth {
                        TruthMode::Reference
                    } else {
                        TruthMode::Distribution
                    },
                    shrinkage: Shrinkage {
                        min_coverage,
                        seed_weight,
                    },
                    min_trend_points: DEFAULT_MIN_TREND_POINTS,
                },
                seed: seed.map(|seed| seed.to_string_lossy().into_owned()),
                output: output.to_string_lossy().into_owned(),
                threads,
                timeout: timeout_secs.map(Duration::from_secs),
            };
            config.validate()?;
            info!("Counting policy: {:?}", config.policy);

            let sources = BamSources::new(&bams, &reference)?;
            let store = JsonFileStore::new();
            let report = Job::new(config, &sources, &store).run();
            report.log();
            if let Some(stats) = stats {
                report.write_json(stats)?;
            }

            if report.is_success() {
                Ok(())
            } else {
                Err(anyhow!(
                    "job failed: {}",
                    report.error().as_deref().unwrap_or("unknown error")
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Hpolfit {
        Hpolfit::from_iter_safe(
            ["hpolfit", "estimate"]
                .iter()
                .chain(args.iter())
                .cloned(),
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let opt = parse(&[
            "--bam",
            "a.bam",
            "--bam",
            "b.bam",
            "--reference",
            "ref.fa",
            "--region",
            "chr1:1001-2000",
            "--sample",
            "NA12878",
            "--output",
            "params.json",
        ]);
        assert!(!opt.verbose());
        match opt {
            Hpolfit::Estimate {
                bams,
                regions,
                min_coverage,
                seed_weight,
                threads,
                use_strand,
                count_reads,
                ..
            } => {
                assert_eq!(bams.len(), 2);
                assert_eq!(regions, vec![Region::new("chr1", 1000, 2000)]);
                assert_eq!(min_coverage, 10);
                assert_relative_eq!(seed_weight, 0.5);
                assert_eq!(threads, 1);
                assert!(!use_strand);
                assert!(!count_reads);
            }
        }
    }

    #[test]
    fn test_invalid_region() {
        let result = Hpolfit::from_iter_safe(vec![
            "hpolfit",
            "estimate",
            "--bam",
            "a.bam",
            "--reference",
            "ref.fa",
            "--region",
            "chr1:0-10",
            "--sample",
            "s",
            "--output",
            "o.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_bam_is_required() {
        let result = Hpolfit::from_iter_safe(vec![
            "hpolfit",
            "estimate",
            "--reference",
            "ref.fa",
            "--region",
            "chr1",
            "--sample",
            "s",
            "--output",
            "o.json",
        ]);
        assert!(result.is_err());
    }
}
