//! Expansion of per-variant scores into labelled rows and their TSV output.
use crate::error::{Error, ErrorKind};
use crate::model::OutputLabels;
use crate::strategy::DiffType;
use crate::variant::VariantRecord;
use crate::Result;
use std::io::Write;

/// Column order of the score table
pub const SCORE_HEADER: [&str; 4] = ["variant_id", "label", "score", "diff_type"];
/// Column order of the failure table
pub const FAILURE_HEADER: [&str; 3] = ["variant_id", "error_kind", "message"];

/// Score of one variant for one output label
#[derive(Debug, Clone, PartialEq)]
pub struct EffectScoreRow {
    variant_id: String,
    label: String,
    score: f64,
    diff_type: DiffType,
}

impl EffectScoreRow {
    #[allow(missing_docs)]
    pub fn variant_id(&self) -> &str {
        &self.variant_id
    }

    #[allow(missing_docs)]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[allow(missing_docs)]
    pub fn score(&self) -> f64 {
        self.score
    }

    #[allow(missing_docs)]
    pub fn diff_type(&self) -> DiffType {
        self.diff_type
    }

    /// Tab separated representation in [`SCORE_HEADER`] order
    pub fn to_tsv_row(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.variant_id, self.label, self.score, self.diff_type
        )
    }
}

/// A variant that could not be scored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantFailure {
    /// Supplied or synthesized identifier
    pub variant_id: String,
    #[allow(missing_docs)]
    pub kind: ErrorKind,
    /// Human readable cause
    pub message: String,
}

impl VariantFailure {
    /// Records `error` against `variant_id`
    pub fn new<S: Into<String>>(variant_id: S, error: &Error) -> Self {
        Self {
            variant_id: variant_id.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// Tab separated representation in [`FAILURE_HEADER`] order
    pub fn to_tsv_row(&self) -> String {
        format!(
            "{}\t{}\t{}",
            self.variant_id,
            self.kind,
            self.message.replace(|c: char| c == '\t' || c == '\n', " ")
        )
    }
}

/// Ordered score rows of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreTable {
    rows: Vec<EffectScoreRow>,
}

impl ScoreTable {
    #[allow(missing_docs)]
    pub fn rows(&self) -> &[EffectScoreRow] {
        &self.rows
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Writes the header followed by one line per row
    pub fn write_tsv<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "{}", SCORE_HEADER.join("\t"))?;
        for row in &self.rows {
            writeln!(out, "{}", row.to_tsv_row())?;
        }
        Ok(())
    }
}

impl IntoIterator for ScoreTable {
    type Item = EffectScoreRow;
    type IntoIter = std::vec::IntoIter<EffectScoreRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Expands every scored variant into one row per label, in input then label order
pub fn assemble(
    batch_results: &[(VariantRecord, Vec<f64>)],
    labels: &OutputLabels,
    diff_type: DiffType,
) -> Result<ScoreTable> {
    let mut rows = Vec::with_capacity(batch_results.len() * labels.len());
    for (variant, scores) in batch_results {
        labels.check_width(scores.len())?;
        let variant_id = variant.variant_id();
        rows.extend(
            labels
                .iter()
                .zip(scores)
                .map(|(label, score)| EffectScoreRow {
                    variant_id: variant_id.clone(),
                    label: label.to_string(),
                    score: *score,
                    diff_type,
                }),
        );
    }
    Ok(ScoreTable { rows })
}

/// Writes the failure header followed by one line per failure
pub fn write_failures<W: Write>(failures: &[VariantFailure], out: &mut W) -> Result<()> {
    writeln!(out, "{}", FAILURE_HEADER.join("\t"))?;
    for failure in failures {
        writeln!(out, "{}", failure.to_tsv_row())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> OutputLabels {
        vec!["bound", "unbound"].into_iter().collect()
    }

    fn results() -> Vec<(VariantRecord, Vec<f64>)> {
        vec![
            (
                VariantRecord::new("chr1", 100, "A", "G", None).unwrap(),
                vec![0.5, -0.5],
            ),
            (
                VariantRecord::new("chr2", 7, "C", "T", Some("rs7".to_string())).unwrap(),
                vec![0.25, 0.0],
            ),
        ]
    }

    #[test]
    fn one_row_per_variant_and_label() {
        let table = assemble(&results(), &labels(), DiffType::Diff).unwrap();
        assert_eq!(table.len(), 4);
        let ids: Vec<_> = table.rows().iter().map(|r| r.variant_id()).collect();
        assert_eq!(ids, vec!["chr1:100A>G", "chr1:100A>G", "rs7", "rs7"]);
        let row_labels: Vec<_> = table.rows().iter().map(|r| r.label()).collect();
        assert_eq!(row_labels, vec!["bound", "unbound", "bound", "unbound"]);
        assert_eq!(table.rows()[1].score(), -0.5);
        assert!(table.rows().iter().all(|r| r.diff_type() == DiffType::Diff));
    }

    #[test]
    fn assembling_is_idempotent() {
        let first = assemble(&results(), &labels(), DiffType::LogOdds).unwrap();
        let second = assemble(&results(), &labels(), DiffType::LogOdds).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn wrong_score_width() {
        let mut results = results();
        results[1].1.push(1.0);
        let err = assemble(&results, &labels(), DiffType::Diff).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    }

    #[test]
    fn tsv_layout() {
        let table = assemble(&results()[..1], &labels(), DiffType::Diff).unwrap();
        let mut out = Vec::new();
        table.write_tsv(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "variant_id\tlabel\tscore\tdiff_type\n\
             chr1:100A>G\tbound\t0.5\tdiff\n\
             chr1:100A>G\tunbound\t-0.5\tdiff\n"
        );
    }

    #[test]
    fn failure_layout() {
        let failure = VariantFailure::new("chr1:1A>G", &Error::UnknownSequence("chr1".to_string()));
        let mut out = Vec::new();
        write_failures(&[failure], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("variant_id\terror_kind\tmessage\n"));
        assert!(text.contains("chr1:1A>G\tUnknownSequence\t"));
    }
}
