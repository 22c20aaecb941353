// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("malformed alignment of read {qname}: {msg}")]
    MalformedAlignment { qname: String, msg: String },
    #[error("unable to fit error model for homopolymer group {base}{length}: {msg}")]
    ModelFit {
        base: char,
        length: u32,
        msg: String,
    },
    #[error("parameter set {id} not found")]
    NotFound { id: String },
    #[error("parameter set {id} has format version {found}, but at most version {supported} is supported; please upgrade hpolfit")]
    IncompatibleVersion {
        id: String,
        found: u32,
        supported: u32,
    },
    #[error("invalid parameter set {id}: {msg}")]
    InvalidParameterFile { id: String, msg: String },
    #[error("invalid coefficient for homopolymer group {base}{length}: {value} is not a probability")]
    InvalidCoefficient { base: char, length: u32, value: f64 },
    #[error("{source_name} is unavailable: {msg}")]
    SourceUnavailable { source_name: String, msg: String },
    #[error("the alignments are not sorted by coordinate: {previous} > {current}")]
    UnsortedAlignments { previous: String, current: String },
    #[error("invalid region {spec}; use CHROM or CHROM:START-END syntax (1-based, inclusive)")]
    InvalidRegion { spec: String },
    #[error("contig {contig} not found in reference")]
    UnknownContig { contig: String },
    #[error("at least one region has to be given")]
    EmptyRegions,
    #[error("at least one alignment file has to be given")]
    EmptyAlignments,
    #[error("invalid seed weight {weight}, must be within [0, 1]")]
    InvalidShrinkageWeight { weight: f64 },
    #[error("number of threads has to be at least 1")]
    InvalidThreads,
    #[error("job was cancelled")]
    Cancelled,
    #[error("job exceeded its time limit")]
    TimedOut,
}

pub(crate) fn malformed_alignment(qname: &[u8], msg: &str) -> Error {
    Error::MalformedAlignment {
        qname: String::from_utf8_lossy(qname).into_owned(),
        msg: msg.to_owned(),
    }
}

pub(crate) fn source_unavailable(source_name: &str, msg: impl ToString) -> Error {
    Error::SourceUnavailable {
        source_name: source_name.to_owned(),
        msg: msg.to_string(),
    }
}
