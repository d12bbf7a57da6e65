//! Crate error type and the kinds recorded against failed variants.
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
/// Errors raised while ingesting variants, building windows, querying the model or
/// reading the input files. Variant level errors are recoverable, see [`Error::is_systemic`].
pub enum Error {
    #[error("Invalid variant {0}: {1}")]
    /// Malformed variant record, rejected at ingestion
    InvalidVariant(String, String),
    #[error("Reference window shape {ref_shape:?} differs from alternate shape {alt_shape:?}")]
    /// Reference and alternate windows disagree in shape
    ShapeMismatch {
        /// Shape of the reference encoding
        ref_shape: Vec<usize>,
        /// Shape of the alternate encoding
        alt_shape: Vec<usize>,
    },
    #[error("Model output has {found} columns but {expected} output labels are declared")]
    /// Model output dimensionality disagrees with the output labels
    SchemaMismatch {
        /// Number of declared labels
        expected: usize,
        /// Number of columns produced
        found: usize,
    },
    #[error("Output labels {requested:?} do not follow the model columns {declared:?}")]
    /// Output labels name the model columns in a different order, or different names
    LabelMismatch {
        /// Columns declared by the model
        declared: Vec<String>,
        /// Labels supplied for the run
        requested: Vec<String>,
    },
    #[error("Window [{start}, {end}) on {chrom} falls outside the sequence of length {len}")]
    /// Variant too close to the edge of a sequence for the requested window
    WindowOutOfBounds {
        /// Sequence name
        chrom: String,
        /// 0-based window start, may be negative
        start: i64,
        /// 0-based exclusive window end
        end: i64,
        /// Sequence length
        len: usize,
    },
    #[error("Sequence `{0}` is not present in the reference")]
    /// Chromosome missing from the reference
    UnknownSequence(String),
    #[error("Model inference failed: {0}")]
    /// The model failed on a batch
    ModelInference(String),
    #[error("Configuration error: {0}")]
    /// Invalid run or model configuration
    Config(String),
    #[error("Run exceeded the timeout before batch {0} started")]
    /// Timeout checked before each batch, holds the index of the batch not started
    Timeout(usize),
    #[error("Could not read input file")]
    /// I/O errors
    Io(#[from] std::io::Error),
    #[error("Could not convert bytes as it is invalid UTF-8")]
    /// Data is not in UTF-8 format
    NotUTF8(#[from] std::string::FromUtf8Error),
    #[error("Could not open compressed input")]
    /// Compressed file could not be opened
    Compression(#[from] niffler::Error),
    #[error("Could not read VCF/BCF file")]
    /// Read VCF/BCF Error
    CouldNotReadVcf(#[from] rust_htslib::errors::Error),
    #[error("Could not parse model file")]
    /// Malformed model JSON
    ModelFile(#[from] serde_json::Error),
    #[error("Could not read BED entry at line {0}")]
    /// Malformed BED entry
    BedRecordError(usize),
    #[error("Incorrect interval in BED entry on line {0}, end {2} is smaller than start {1}")]
    /// BED entry with end before start
    IncorrectInterval(usize, u64, u64),
    #[error("Could not spawn threads")]
    /// Create thread pools error
    ThreadError,
}

/// Discriminant of [`Error`] reported in failure records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ErrorKind {
    InvalidVariant,
    ShapeMismatch,
    SchemaMismatch,
    WindowOutOfBounds,
    UnknownSequence,
    ModelInference,
    Config,
    Timeout,
    Input,
}

impl Error {
    /// Returns the kind used when the error is recorded against a variant
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidVariant(..) => ErrorKind::InvalidVariant,
            Error::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            Error::SchemaMismatch { .. } | Error::LabelMismatch { .. } => ErrorKind::SchemaMismatch,
            Error::WindowOutOfBounds { .. } => ErrorKind::WindowOutOfBounds,
            Error::UnknownSequence(_) => ErrorKind::UnknownSequence,
            Error::ModelInference(_) => ErrorKind::ModelInference,
            Error::Config(_) | Error::ThreadError => ErrorKind::Config,
            Error::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::Input,
        }
    }

    /// Systemic errors abort the run regardless of the failure policy
    pub fn is_systemic(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::InvalidVariant
                | ErrorKind::ShapeMismatch
                | ErrorKind::WindowOutOfBounds
                | ErrorKind::UnknownSequence
                | ErrorKind::ModelInference
        )
    }
}

impl ErrorKind {
    /// Name written in the failure table
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidVariant => "InvalidVariant",
            ErrorKind::ShapeMismatch => "ShapeMismatch",
            ErrorKind::SchemaMismatch => "SchemaMismatch",
            ErrorKind::WindowOutOfBounds => "WindowOutOfBounds",
            ErrorKind::UnknownSequence => "UnknownSequence",
            ErrorKind::ModelInference => "ModelInference",
            ErrorKind::Config => "Config",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Input => "Input",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
