//! Sequence-to-function model capability and the bundled motif model.
use crate::error::Error;
use crate::Result;
use log::{debug, info};
use ndarray::{s, Array2, ArrayView2, ArrayView3};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// One declared model output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    /// Label naming the output column
    pub name: String,
    /// Free text metadata
    pub description: Option<String>,
}

/// Ordered declaration of the model outputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSchema(pub Vec<OutputTarget>);

/// Labels of the model output columns, fixed for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLabels(Vec<String>);

/// A trained model scoring batches of one-hot encoded sequences
pub trait Model: Send + Sync {
    /// Declared outputs, in column order
    fn output_schema(&self) -> &OutputSchema;

    /// Scores a `(batch, length, 4)` tensor, returning a `(batch, outputs)` matrix
    fn predict(&self, batch: ArrayView3<'_, f32>) -> Result<Array2<f32>>;
}

impl OutputLabels {
    /// Derives the labels from a model's declared schema
    pub fn from_schema(schema: &OutputSchema) -> Result<Self> {
        if schema.0.is_empty() {
            return Err(Error::Config("model declares no outputs".to_string()));
        }
        let mut seen = HashSet::new();
        for target in &schema.0 {
            if !seen.insert(target.name.as_str()) {
                return Err(Error::Config(format!(
                    "model declares output `{}` more than once",
                    target.name
                )));
            }
        }
        Ok(Self(schema.0.iter().map(|t| t.name.clone()).collect()))
    }

    /// Derives the labels of `model`
    pub fn from_model<M: Model + ?Sized>(model: &M) -> Result<Self> {
        Self::from_schema(model.output_schema())
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[allow(missing_docs)]
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[allow(missing_docs)]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Fails with [`Error::SchemaMismatch`] unless there are `width` labels
    pub fn check_width(&self, width: usize) -> Result<()> {
        if width == self.len() {
            Ok(())
        } else {
            Err(Error::SchemaMismatch {
                expected: self.len(),
                found: width,
            })
        }
    }

    /// Fails with [`Error::LabelMismatch`] unless the labels name the columns of
    /// `schema` in the same order
    pub fn check_schema(&self, schema: &OutputSchema) -> Result<()> {
        if self.iter().eq(schema.0.iter().map(|t| t.name.as_str())) {
            Ok(())
        } else {
            Err(Error::LabelMismatch {
                declared: schema.0.iter().map(|t| t.name.clone()).collect(),
                requested: self.0.clone(),
            })
        }
    }
}

impl<S: Into<String>> std::iter::FromIterator<S> for OutputLabels {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Runs the model and verifies the returned matrix has one row per sequence and one
/// column per label, with `labels` in the model's declared column order
pub fn predict_checked<M: Model + ?Sized>(
    model: &M,
    batch: ArrayView3<'_, f32>,
    labels: &OutputLabels,
) -> Result<Array2<f32>> {
    labels.check_schema(model.output_schema())?;
    let n = batch.shape()[0];
    debug!("Running model on {} sequences", n);
    let output = model.predict(batch).map_err(|e| match e {
        Error::ModelInference(_) | Error::SchemaMismatch { .. } | Error::LabelMismatch { .. } => e,
        other => Error::ModelInference(other.to_string()),
    })?;
    labels.check_width(output.ncols())?;
    if output.nrows() != n {
        return Err(Error::ModelInference(format!(
            "model returned {} rows for {} sequences",
            output.nrows(),
            n
        )));
    }
    Ok(output)
}

#[derive(Debug, Deserialize)]
struct MotifModelFile {
    targets: Vec<MotifTarget>,
}

/// A motif scored against both strands of the sequence
#[derive(Debug, Clone, Deserialize)]
pub struct MotifTarget {
    /// Output label
    pub name: String,
    #[serde(default)]
    /// Free text metadata
    pub description: Option<String>,
    #[serde(default)]
    /// Added to the best motif score before the sigmoid
    pub bias: f32,
    /// Log-odds weights per motif position in `A, C, G, T` order
    pub motif: Vec<[f32; 4]>,
}

/// Position weight matrix model. Each target outputs
/// `sigmoid(bias + max motif score over offsets and strands)`.
#[derive(Debug, Clone)]
pub struct MotifModel {
    schema: OutputSchema,
    forward: Vec<Array2<f32>>,
    reverse: Vec<Array2<f32>>,
    biases: Vec<f32>,
}

impl MotifModel {
    /// Loads a JSON model file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Loading motif model from {}", path.as_ref().display());
        let file = std::fs::File::open(path.as_ref())?;
        let parsed: MotifModelFile = serde_json::from_reader(std::io::BufReader::new(file))?;
        Self::from_targets(parsed.targets)
    }

    #[allow(missing_docs)]
    pub fn from_targets(targets: Vec<MotifTarget>) -> Result<Self> {
        if targets.is_empty() {
            return Err(Error::Config("motif model has no targets".to_string()));
        }
        let mut forward = Vec::with_capacity(targets.len());
        let mut reverse = Vec::with_capacity(targets.len());
        for target in &targets {
            if target.motif.is_empty() {
                return Err(Error::Config(format!(
                    "motif of target `{}` is empty",
                    target.name
                )));
            }
            let m = target.motif.len();
            let weights = Array2::from_shape_fn((m, 4), |(i, j)| target.motif[i][j]);
            reverse.push(weights.slice(s![..;-1, ..;-1]).to_owned());
            forward.push(weights);
        }

        let schema = OutputSchema(
            targets
                .iter()
                .map(|t| OutputTarget {
                    name: t.name.clone(),
                    description: t.description.clone(),
                })
                .collect(),
        );
        OutputLabels::from_schema(&schema)?;

        Ok(Self {
            schema,
            forward,
            reverse,
            biases: targets.iter().map(|t| t.bias).collect(),
        })
    }

    fn best_score(seq: ArrayView2<'_, f32>, weights: &Array2<f32>) -> f32 {
        let m = weights.nrows();
        (0..=seq.nrows() - m)
            .map(|offset| (&seq.slice(s![offset..offset + m, ..]) * weights).sum())
            .fold(f32::NEG_INFINITY, f32::max)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl Model for MotifModel {
    fn output_schema(&self) -> &OutputSchema {
        &self.schema
    }

    fn predict(&self, batch: ArrayView3<'_, f32>) -> Result<Array2<f32>> {
        let (n, len, width) = batch.dim();
        if width != 4 {
            return Err(Error::ModelInference(format!(
                "expected 4 encoding columns but got {}",
                width
            )));
        }
        if let Some(longest) = self.forward.iter().map(|w| w.nrows()).max() {
            if len < longest {
                return Err(Error::ModelInference(format!(
                    "sequence length {} is shorter than the motif length {}",
                    len, longest
                )));
            }
        }

        let mut output = Array2::zeros((n, self.forward.len()));
        for (i, seq) in batch.outer_iter().enumerate() {
            for (t, (fwd, rev)) in self.forward.iter().zip(&self.reverse).enumerate() {
                let best = Self::best_score(seq, fwd).max(Self::best_score(seq, rev));
                output[[i, t]] = sigmoid(self.biases[t] + best);
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::window::one_hot;
    use ndarray::{stack, Array3, Axis};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic model with one output per nucleotide: the share of that base in the
    /// sequence, weighted by position so reordering changes the output.
    #[derive(Debug)]
    pub(crate) struct CompositionModel {
        schema: OutputSchema,
        pub(crate) calls: AtomicUsize,
        pub(crate) sequences: AtomicUsize,
    }

    impl CompositionModel {
        pub(crate) fn new(labels: &[&str]) -> Self {
            Self {
                schema: OutputSchema(
                    labels
                        .iter()
                        .map(|l| OutputTarget {
                            name: l.to_string(),
                            description: None,
                        })
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
                sequences: AtomicUsize::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Model for CompositionModel {
        fn output_schema(&self) -> &OutputSchema {
            &self.schema
        }

        fn predict(&self, batch: ArrayView3<'_, f32>) -> Result<Array2<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sequences.fetch_add(batch.shape()[0], Ordering::SeqCst);
            let (n, len, _) = batch.dim();
            let outputs = self.schema.0.len();
            Ok(Array2::from_shape_fn((n, outputs), |(i, t)| {
                let col = t % 4;
                let weighted: f32 = (0..len)
                    .map(|p| batch[[i, p, col]] * (p + 1) as f32)
                    .sum();
                0.1 + 0.8 * weighted / (len * (len + 1) / 2) as f32
            }))
        }
    }

    #[test]
    fn labels_follow_schema_order() {
        let model = CompositionModel::new(&["bound", "unbound"]);
        let labels = OutputLabels::from_model(&model).unwrap();
        assert_eq!(labels.as_slice(), &["bound".to_string(), "unbound".to_string()]);
        assert!(labels.check_width(2).is_ok());
        assert!(matches!(
            labels.check_width(3),
            Err(Error::SchemaMismatch {
                expected: 2,
                found: 3
            })
        ));
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let model = CompositionModel::new(&["bound", "bound"]);
        assert!(OutputLabels::from_model(&model).is_err());
    }

    #[test]
    fn checked_prediction_rejects_wrong_width() {
        let model = CompositionModel::new(&["a", "b", "c"]);
        let labels: OutputLabels = vec!["a", "b"].into_iter().collect();
        let batch = Array3::<f32>::zeros((2, 10, 4));
        let err = predict_checked(&model, batch.view(), &labels).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn checked_prediction_rejects_reordered_labels() {
        let model = CompositionModel::new(&["bound", "unbound"]);
        let labels: OutputLabels = vec!["unbound", "bound"].into_iter().collect();
        assert!(labels.check_width(2).is_ok());

        let batch = Array3::<f32>::zeros((2, 10, 4));
        let err = predict_checked(&model, batch.view(), &labels).unwrap_err();
        assert!(matches!(err, Error::LabelMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        assert!(err.is_systemic());

        let labels = OutputLabels::from_model(&model).unwrap();
        assert!(predict_checked(&model, batch.view(), &labels).is_ok());
    }

    #[test]
    fn model_output_of_wrong_width() {
        #[derive(Debug)]
        struct Wide(OutputSchema);

        impl Model for Wide {
            fn output_schema(&self) -> &OutputSchema {
                &self.0
            }

            fn predict(&self, batch: ArrayView3<'_, f32>) -> Result<Array2<f32>> {
                Ok(Array2::zeros((batch.shape()[0], 3)))
            }
        }

        let model = Wide(OutputSchema(vec![OutputTarget {
            name: "bound".to_string(),
            description: None,
        }]));
        let labels = OutputLabels::from_model(&model).unwrap();
        let batch = Array3::<f32>::zeros((1, 10, 4));
        assert!(matches!(
            predict_checked(&model, batch.view(), &labels),
            Err(Error::SchemaMismatch {
                expected: 1,
                found: 3
            })
        ));
    }

    #[test]
    fn motif_model_scores_both_strands() {
        let model = MotifModel::from_targets(vec![MotifTarget {
            name: "gata".to_string(),
            description: None,
            bias: -3.0,
            motif: vec![
                [0.0, 0.0, 2.0, 0.0],
                [2.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 2.0],
                [2.0, 0.0, 0.0, 0.0],
            ],
        }])
        .unwrap();

        let seqs = [one_hot(b"CCGATACC"), one_hot(b"CCTATCCC"), one_hot(b"NNNNNNNN")];
        let views: Vec<_> = seqs.iter().map(|s| s.view()).collect();
        let batch = stack(Axis(0), &views).unwrap();
        let output = model.predict(batch.view()).unwrap();

        assert_eq!(output.shape(), &[3, 1]);
        assert!((output[[0, 0]] - sigmoid(5.0)).abs() < 1e-6);
        assert!((output[[1, 0]] - sigmoid(5.0)).abs() < 1e-6);
        assert!((output[[2, 0]] - sigmoid(-3.0)).abs() < 1e-6);
    }

    #[test]
    fn motif_model_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"targets": [
                {{"name": "bound", "bias": -1.0, "motif": [[1, 0, 0, 0], [0, 1, 0, 0]]}},
                {{"name": "unbound", "description": "inverse", "motif": [[0, 0, 0, 1]]}}
            ]}}"#
        )
        .unwrap();
        let model = MotifModel::from_path(file.path()).unwrap();
        let labels = OutputLabels::from_model(&model).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(
            model.output_schema().0[1].description.as_deref(),
            Some("inverse")
        );
    }

    #[test]
    fn motif_rows_need_four_weights() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"targets": [{{"name": "bound", "motif": [[1, 0, 0]]}}]}}"#
        )
        .unwrap();
        assert!(matches!(
            MotifModel::from_path(file.path()),
            Err(Error::ModelFile(_))
        ));
    }

    #[test]
    fn short_sequences_fail_inference() {
        let model = MotifModel::from_targets(vec![MotifTarget {
            name: "long".to_string(),
            description: None,
            bias: 0.0,
            motif: vec![[1.0, 0.0, 0.0, 0.0]; 12],
        }])
        .unwrap();
        let batch = Array3::<f32>::zeros((1, 8, 4));
        assert!(matches!(
            model.predict(batch.view()),
            Err(Error::ModelInference(_))
        ));
    }
}
