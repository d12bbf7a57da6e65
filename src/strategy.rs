//! Evaluation strategies turning a pair of reference/alternate windows into one score
//! per output label.
//!
//! Both provided strategies score the variant in its own context and, optionally, in a
//! set of perturbed contexts around it:
//!
//! * [`EvaluationStrategy::Ism`] writes every other base at each position in scope into
//!   both windows, one single-position substitution at a time. Combinatorial
//!   perturbation is not performed.
//! * [`EvaluationStrategy::Masking`] zeroes one position at a time in both windows.
//!
//! Positions inside the allele span are never perturbed. Each perturbed pair is scored
//! with the [`DiffType`] and the per-label deltas are reduced with the [`Aggregation`].
use crate::error::Error;
use crate::model::{predict_checked, Model, OutputLabels};
use crate::window::SequenceWindow;
use crate::{Result, NUCLEOTIDES};
use log::{debug, trace};
use ndarray::{stack, Array2, Axis};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Clamp applied before logarithms
pub const EPSILON: f64 = 1e-7;
/// Bases perturbed either side of the allele span unless configured otherwise
pub const DEFAULT_FLANK: usize = 5;

/// Transform comparing the alternate output `a` against the reference output `r`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffType {
    /// `a - r`
    Diff,
    /// `logit(a) - logit(r)`
    LogOdds,
    /// `a / r`
    Ratio,
    /// `ln(a) - ln(r)`
    LogRatio,
}

impl DiffType {
    #[allow(missing_docs)]
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffType::Diff => "diff",
            DiffType::LogOdds => "log_odds",
            DiffType::Ratio => "ratio",
            DiffType::LogRatio => "log_ratio",
        }
    }

    /// Scores the alternate output against the reference output
    pub fn apply(&self, alt: f32, reference: f32) -> f64 {
        let (a, r) = (alt as f64, reference as f64);
        match self {
            DiffType::Diff => a - r,
            DiffType::LogOdds => logit(a) - logit(r),
            DiffType::Ratio => a / r,
            DiffType::LogRatio => a.max(EPSILON).ln() - r.max(EPSILON).ln(),
        }
    }
}

fn logit(p: f64) -> f64 {
    let p = p.max(EPSILON).min(1.0 - EPSILON);
    (p / (1.0 - p)).ln()
}

impl Default for DiffType {
    fn default() -> Self {
        DiffType::Diff
    }
}

impl fmt::Display for DiffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiffType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "diff" => Ok(DiffType::Diff),
            "log_odds" => Ok(DiffType::LogOdds),
            "ratio" => Ok(DiffType::Ratio),
            "log_ratio" => Ok(DiffType::LogRatio),
            other => Err(Error::Config(format!("unknown diff type `{}`", other))),
        }
    }
}

/// Granularity of the ISM perturbations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perturbation {
    /// Score the alternate against the reference only
    Allele,
    /// Every single-position substitution within the scope
    Single,
}

/// Positions eligible for perturbation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Positions within this many bases of the allele span
    Flank(usize),
    /// Every position of the window
    Window,
}

/// Reduction of the per-context deltas into one score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Arithmetic mean
    Mean,
    /// Sum
    Sum,
    /// Signed value with the largest magnitude, the earliest wins ties
    MaxAbs,
}

/// Handling of the reverse strand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrandMerge {
    /// Forward strand only
    Forward,
    /// Mean of the forward and reverse complement scores
    Mean,
    /// Forward or reverse complement score with the larger magnitude
    MaxAbs,
}

impl Aggregation {
    /// Reduces `values`, which must not be empty
    pub fn reduce(&self, values: &[f64]) -> f64 {
        match self {
            Aggregation::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Sum => values.iter().sum(),
            Aggregation::MaxAbs => values.iter().skip(1).fold(values[0], |best, v| {
                if v.abs() > best.abs() {
                    *v
                } else {
                    best
                }
            }),
        }
    }
}

impl StrandMerge {
    fn strands(&self) -> usize {
        match self {
            StrandMerge::Forward => 1,
            _ => 2,
        }
    }

    fn merge(&self, values: &[f64]) -> f64 {
        match self {
            StrandMerge::Forward => values[0],
            StrandMerge::Mean => Aggregation::Mean.reduce(values),
            StrandMerge::MaxAbs => Aggregation::MaxAbs.reduce(values),
        }
    }
}

macro_rules! parse_enum {
    ($ty:ident, $what:expr, { $($name:expr => $variant:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($name => Ok($variant),)+
                    other => Err(Error::Config(format!("unknown {} `{}`", $what, other))),
                }
            }
        }
    };
}

parse_enum!(Perturbation, "perturbation", {
    "allele" => Perturbation::Allele,
    "single" => Perturbation::Single,
});
parse_enum!(Aggregation, "aggregation", {
    "mean" => Aggregation::Mean,
    "sum" => Aggregation::Sum,
    "max_abs" => Aggregation::MaxAbs,
});
parse_enum!(StrandMerge, "strand handling", {
    "forward" => StrandMerge::Forward,
    "mean" => StrandMerge::Mean,
    "max_abs" => StrandMerge::MaxAbs,
});

/// Options of the in-silico mutagenesis strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct IsmOptions {
    pub perturbation: Perturbation,
    pub scope: Scope,
    pub aggregation: Aggregation,
    pub strand: StrandMerge,
}

impl Default for IsmOptions {
    fn default() -> Self {
        Self {
            perturbation: Perturbation::Allele,
            scope: Scope::Flank(DEFAULT_FLANK),
            aggregation: Aggregation::Mean,
            strand: StrandMerge::Forward,
        }
    }
}

/// Options of the masking strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct MaskingOptions {
    pub scope: Scope,
    pub aggregation: Aggregation,
    pub strand: StrandMerge,
}

impl Default for MaskingOptions {
    fn default() -> Self {
        Self {
            scope: Scope::Flank(DEFAULT_FLANK),
            aggregation: Aggregation::Mean,
            strand: StrandMerge::Forward,
        }
    }
}

/// Known evaluation strategies, selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStrategy {
    /// In-silico mutagenesis
    Ism(IsmOptions),
    /// Single-position masking
    Masking(MaskingOptions),
}

impl Default for EvaluationStrategy {
    fn default() -> Self {
        EvaluationStrategy::Ism(IsmOptions::default())
    }
}

/// Scores for a batch: the outer error fails every pair, the inner ones a single pair
pub type BatchScores = Result<Vec<Result<Vec<f64>>>>;

/// Contract of an evaluation strategy. Implementors never mutate the input windows and
/// return one score per label in `labels` order.
pub trait Evaluate: Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Scores a single reference/alternate pair
    fn evaluate(
        &self,
        model: &dyn Model,
        ref_window: &SequenceWindow,
        alt_window: &SequenceWindow,
        labels: &OutputLabels,
        diff_type: DiffType,
    ) -> Result<Vec<f64>>;

    /// Whether [`Evaluate::evaluate_batch`] queries the model once for all pairs
    fn supports_batching(&self) -> bool {
        false
    }

    /// Scores several pairs, by default one [`Evaluate::evaluate`] call per pair
    fn evaluate_batch(
        &self,
        model: &dyn Model,
        pairs: &[(&SequenceWindow, &SequenceWindow)],
        labels: &OutputLabels,
        diff_type: DiffType,
    ) -> BatchScores {
        Ok(pairs
            .iter()
            .map(|(ref_window, alt_window)| {
                self.evaluate(model, ref_window, alt_window, labels, diff_type)
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Substitute(usize, usize),
    Mask(usize),
}

impl Edit {
    fn applied(&self, encoding: &Array2<f32>) -> Array2<f32> {
        let mut encoding = encoding.clone();
        match *self {
            Edit::Substitute(p, b) => {
                encoding.row_mut(p).fill(0.0);
                encoding[[p, b]] = 1.0;
            }
            Edit::Mask(p) => encoding.row_mut(p).fill(0.0),
        }
        encoding
    }
}

/// Every sequence needed to score one pair, ordered context, strand, then ref/alt
#[derive(Debug)]
struct Plan {
    sequences: Vec<Array2<f32>>,
    contexts: usize,
    strands: usize,
}

impl EvaluationStrategy {
    /// Positions perturbed around the variant, `None` when only the allele is scored
    pub fn scope(&self) -> Option<Scope> {
        match self {
            EvaluationStrategy::Ism(opts) if opts.perturbation == Perturbation::Allele => None,
            EvaluationStrategy::Ism(opts) => Some(opts.scope),
            EvaluationStrategy::Masking(opts) => Some(opts.scope),
        }
    }

    fn aggregation(&self) -> Aggregation {
        match self {
            EvaluationStrategy::Ism(opts) => opts.aggregation,
            EvaluationStrategy::Masking(opts) => opts.aggregation,
        }
    }

    fn strand(&self) -> StrandMerge {
        match self {
            EvaluationStrategy::Ism(opts) => opts.strand,
            EvaluationStrategy::Masking(opts) => opts.strand,
        }
    }

    /// Positions to perturb, never inside the allele spans
    fn positions(scope: Scope, len: usize, span: &Range<usize>) -> Vec<usize> {
        let (lo, hi) = match scope {
            Scope::Flank(flank) => (
                span.start.saturating_sub(flank),
                (span.end + flank).min(len),
            ),
            Scope::Window => (0, len),
        };
        (lo..hi).filter(|p| !span.contains(p)).collect()
    }

    fn edits(
        &self,
        ref_enc: &Array2<f32>,
        alt_enc: &Array2<f32>,
        span: &Range<usize>,
    ) -> Vec<Edit> {
        let scope = match self.scope() {
            Some(scope) => scope,
            None => return Vec::new(),
        };
        let positions = Self::positions(scope, ref_enc.nrows(), span);
        match self {
            EvaluationStrategy::Ism(_) => positions
                .into_iter()
                .flat_map(|p| {
                    (0..NUCLEOTIDES.len())
                        .filter(move |b| !(ref_enc[[p, *b]] == 1.0 && alt_enc[[p, *b]] == 1.0))
                        .map(move |b| Edit::Substitute(p, b))
                })
                .collect(),
            EvaluationStrategy::Masking(_) => positions
                .into_iter()
                .filter(|p| ref_enc.row(*p).sum() != 0.0 || alt_enc.row(*p).sum() != 0.0)
                .map(Edit::Mask)
                .collect(),
        }
    }

    fn plan(&self, ref_window: &SequenceWindow, alt_window: &SequenceWindow) -> Result<Plan> {
        if ref_window.shape() != alt_window.shape() {
            return Err(Error::ShapeMismatch {
                ref_shape: ref_window.shape(),
                alt_shape: alt_window.shape(),
            });
        }
        let ref_span = ref_window.variant_span();
        let alt_span = alt_window.variant_span();
        let span = ref_span.start.min(alt_span.start)..ref_span.end.max(alt_span.end);

        let ref_enc = ref_window.encoding();
        let alt_enc = alt_window.encoding();
        let edits = self.edits(ref_enc, alt_enc, &span);
        let strand = self.strand();
        let contexts = edits.len() + 1;
        trace!(
            "{} planned {} perturbed contexts around span {:?}",
            self.name(),
            edits.len(),
            span
        );

        let mut sequences = Vec::with_capacity(contexts * strand.strands() * 2);
        let mut push = |r: Array2<f32>, a: Array2<f32>| {
            if strand.strands() == 2 {
                let r_rc = r.slice(ndarray::s![..;-1, ..;-1]).to_owned();
                let a_rc = a.slice(ndarray::s![..;-1, ..;-1]).to_owned();
                sequences.extend(vec![r, a, r_rc, a_rc]);
            } else {
                sequences.push(r);
                sequences.push(a);
            }
        };

        push(ref_enc.clone(), alt_enc.clone());
        for edit in edits {
            push(edit.applied(ref_enc), edit.applied(alt_enc));
        }

        Ok(Plan {
            sequences,
            contexts,
            strands: strand.strands(),
        })
    }

    fn reduce(
        &self,
        plan: &Plan,
        output: &Array2<f32>,
        rows: Range<usize>,
        diff_type: DiffType,
    ) -> Vec<f64> {
        let output = output.slice(ndarray::s![rows, ..]);
        let aggregation = self.aggregation();
        let strand = self.strand();
        (0..output.ncols())
            .map(|label| {
                let deltas: Vec<f64> = (0..plan.contexts)
                    .map(|c| {
                        let per_strand: Vec<f64> = (0..plan.strands)
                            .map(|s| {
                                let row = (c * plan.strands + s) * 2;
                                diff_type.apply(output[[row + 1, label]], output[[row, label]])
                            })
                            .collect();
                        strand.merge(&per_strand)
                    })
                    .collect();
                aggregation.reduce(&deltas)
            })
            .collect()
    }
}

impl Evaluate for EvaluationStrategy {
    fn name(&self) -> &'static str {
        match self {
            EvaluationStrategy::Ism(_) => "ism",
            EvaluationStrategy::Masking(_) => "masking",
        }
    }

    fn evaluate(
        &self,
        model: &dyn Model,
        ref_window: &SequenceWindow,
        alt_window: &SequenceWindow,
        labels: &OutputLabels,
        diff_type: DiffType,
    ) -> Result<Vec<f64>> {
        let mut scores =
            self.evaluate_batch(model, &[(ref_window, alt_window)], labels, diff_type)?;
        match scores.pop() {
            Some(scores) => scores,
            None => Err(Error::ModelInference("no scores produced".to_string())),
        }
    }

    fn supports_batching(&self) -> bool {
        true
    }

    /// Plans every pair, then runs the model once per distinct window shape (normally
    /// once for the whole batch)
    fn evaluate_batch(
        &self,
        model: &dyn Model,
        pairs: &[(&SequenceWindow, &SequenceWindow)],
        labels: &OutputLabels,
        diff_type: DiffType,
    ) -> BatchScores {
        let plans: Vec<Result<Plan>> = pairs
            .iter()
            .map(|(ref_window, alt_window)| self.plan(ref_window, alt_window))
            .collect();

        let mut groups = BTreeMap::<Vec<usize>, Vec<usize>>::new();
        for (i, plan) in plans.iter().enumerate() {
            if let Ok(plan) = plan {
                groups
                    .entry(plan.sequences[0].shape().to_vec())
                    .or_default()
                    .push(i);
            }
        }

        let mut scores: Vec<Option<Vec<f64>>> = vec![None; pairs.len()];
        for (shape, members) in groups {
            let views: Vec<_> = members
                .iter()
                .filter_map(|i| plans[*i].as_ref().ok())
                .flat_map(|plan| plan.sequences.iter().map(|s| s.view()))
                .collect();
            debug!(
                "{} scoring {} pairs of shape {:?} with {} model inputs",
                self.name(),
                members.len(),
                shape,
                views.len()
            );
            let batch = stack(Axis(0), &views)
                .map_err(|e| Error::ModelInference(format!("could not collate batch: {}", e)))?;
            let output = predict_checked(model, batch.view(), labels)?;

            let mut offset = 0;
            for i in members {
                if let Ok(plan) = &plans[i] {
                    let rows = offset..offset + plan.sequences.len();
                    offset = rows.end;
                    scores[i] = Some(self.reduce(plan, &output, rows, diff_type));
                }
            }
        }

        Ok(plans
            .into_iter()
            .zip(scores)
            .map(|(plan, score)| match (plan, score) {
                (Err(e), _) => Err(e),
                (Ok(_), Some(score)) => Ok(score),
                (Ok(_), None) => Err(Error::ModelInference("pair was not scored".to_string())),
            })
            .collect())
    }
}
