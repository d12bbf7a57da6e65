//! Reference and alternate sequence windows around a variant.
//!
//! Windows are one-hot encoded as `length x 4` matrices with columns in [`NUCLEOTIDES`]
//! order, unknown bases are all-zero rows.
use crate::error::Error;
use crate::genomic::SequenceMap;
use crate::variant::VariantRecord;
use crate::{Result, NUCLEOTIDES};
use log::warn;
use ndarray::{s, Array2};
use std::ops::Range;

/// Returns the column of a nucleotide in the one-hot encoding
pub fn nucleotide_index(nuc: u8) -> Option<usize> {
    match nuc {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// One-hot encodes a nucleotide sequence
pub fn one_hot(seq: &[u8]) -> Array2<f32> {
    let mut encoding = Array2::zeros((seq.len(), NUCLEOTIDES.len()));
    for (i, nuc) in seq.iter().enumerate() {
        if let Some(j) = nucleotide_index(*nuc) {
            encoding[[i, j]] = 1.0;
        }
    }
    encoding
}

/// Fixed-length encoded window of a sequence positioned on a variant
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceWindow {
    anchor_pos: u64,
    encoding: Array2<f32>,
    variant_span: Range<usize>,
}

impl SequenceWindow {
    /// Creates a window whose first base sits at the 1-based `anchor_pos`
    pub fn new(anchor_pos: u64, encoding: Array2<f32>, variant_span: Range<usize>) -> Self {
        Self {
            anchor_pos,
            encoding,
            variant_span,
        }
    }

    /// Encodes `seq` directly
    pub fn from_bases(anchor_pos: u64, seq: &[u8], variant_span: Range<usize>) -> Self {
        Self::new(anchor_pos, one_hot(seq), variant_span)
    }

    #[allow(missing_docs)]
    pub fn anchor_pos(&self) -> u64 {
        self.anchor_pos
    }

    /// Number of bases in the window
    pub fn length(&self) -> usize {
        self.encoding.nrows()
    }

    #[allow(missing_docs)]
    pub fn encoding(&self) -> &Array2<f32> {
        &self.encoding
    }

    #[allow(missing_docs)]
    pub fn shape(&self) -> Vec<usize> {
        self.encoding.shape().to_vec()
    }

    /// Window offsets covered by the substituted allele
    pub fn variant_span(&self) -> Range<usize> {
        self.variant_span.clone()
    }

    /// Reverse complement of the window, the allele span is mirrored accordingly.
    /// Reversing the `ACGT` columns swaps A/T and C/G.
    pub fn reverse_complement(&self) -> Self {
        let len = self.length();
        Self {
            anchor_pos: self.anchor_pos,
            encoding: self.encoding.slice(s![..;-1, ..;-1]).to_owned(),
            variant_span: (len - self.variant_span.end)..(len - self.variant_span.start),
        }
    }
}

/// Rule placing the variant inside the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// `(length - 1) / 2` bases upstream of the variant
    Center,
    /// Fixed number of bases upstream of the variant
    Offset(usize),
}

impl Default for Anchor {
    fn default() -> Self {
        Anchor::Center
    }
}

impl Anchor {
    /// Number of bases preceding the variant's first base
    pub fn upstream(&self, window_length: usize) -> usize {
        match self {
            Anchor::Center => window_length.saturating_sub(1) / 2,
            Anchor::Offset(offset) => *offset,
        }
    }
}

/// Source of paired reference/alternate windows for a variant
pub trait WindowBuilder: Sync {
    /// Returns `(reference, alternate)` windows of identical shape. A window falling
    /// outside the sequence is reported as [`Error::WindowOutOfBounds`].
    fn build(
        &self,
        variant: &VariantRecord,
        window_length: usize,
    ) -> Result<(SequenceWindow, SequenceWindow)>;
}

/// Builds windows from in-memory reference sequences
#[derive(Debug, Clone)]
pub struct ReferenceWindowBuilder {
    sequences: SequenceMap,
    anchor: Anchor,
}

impl ReferenceWindowBuilder {
    #[allow(missing_docs)]
    pub fn new(sequences: SequenceMap, anchor: Anchor) -> Self {
        Self { sequences, anchor }
    }

    /// Number of loaded sequences
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Window length bases with `allele` written at `upstream`, filling the rest of the
    /// window from the genome after skipping the reference allele.
    fn substituted(
        &self,
        variant: &VariantRecord,
        seq: &[u8],
        start: usize,
        allele: &[u8],
        window_length: usize,
    ) -> Result<Vec<u8>> {
        let p0 = variant.pos() as usize - 1;
        let resume = p0 + variant.ref_allele().len();
        let tail = window_length - (p0 - start) - allele.len();

        if resume + tail > seq.len() {
            return Err(Error::WindowOutOfBounds {
                chrom: variant.chrom().to_string(),
                start: start as i64,
                end: (resume + tail) as i64,
                len: seq.len(),
            });
        }

        let mut bases = Vec::with_capacity(window_length);
        bases.extend_from_slice(&seq[start..p0]);
        bases.extend_from_slice(allele);
        bases.extend_from_slice(&seq[resume..resume + tail]);
        Ok(bases)
    }
}

impl WindowBuilder for ReferenceWindowBuilder {
    fn build(
        &self,
        variant: &VariantRecord,
        window_length: usize,
    ) -> Result<(SequenceWindow, SequenceWindow)> {
        let seq = self
            .sequences
            .get(variant.chrom())
            .ok_or_else(|| Error::UnknownSequence(variant.chrom().to_string()))?;

        let upstream = self.anchor.upstream(window_length);
        let p0 = variant.pos() as i64 - 1;
        let start = p0 - upstream as i64;
        let end = start + window_length as i64;
        let allele_len = variant
            .ref_allele()
            .len()
            .max(variant.alt_allele().len());
        let out_of_bounds = |end: i64| Error::WindowOutOfBounds {
            chrom: variant.chrom().to_string(),
            start,
            end,
            len: seq.len(),
        };

        if start < 0 || end > seq.len() as i64 {
            return Err(out_of_bounds(end));
        }
        if upstream + allele_len > window_length {
            return Err(out_of_bounds(p0 + allele_len as i64));
        }

        let start = start as usize;
        let p0 = p0 as usize;
        let ref_allele = variant.ref_allele().as_bytes();
        let alt_allele = variant.alt_allele().as_bytes();

        let genome_allele = &seq[p0..p0 + ref_allele.len()];
        if genome_allele != ref_allele {
            warn!(
                "Reference allele of {} does not match the reference sequence ({})",
                variant.desc(),
                String::from_utf8_lossy(genome_allele)
            );
        }

        let ref_bases = self.substituted(variant, seq, start, ref_allele, window_length)?;
        let alt_bases = self.substituted(variant, seq, start, alt_allele, window_length)?;

        let anchor_pos = start as u64 + 1;
        Ok((
            SequenceWindow::from_bases(
                anchor_pos,
                &ref_bases,
                upstream..upstream + ref_allele.len(),
            ),
            SequenceWindow::from_bases(
                anchor_pos,
                &alt_bases,
                upstream..upstream + alt_allele.len(),
            ),
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;

    pub(crate) fn test_sequence(len: usize) -> Vec<u8> {
        (0..len).map(|i| NUCLEOTIDES[(i * 7 + i / 3) % 4]).collect()
    }

    pub(crate) fn test_builder(len: usize, anchor: Anchor) -> ReferenceWindowBuilder {
        let mut sequences = SequenceMap::new();
        sequences.insert("chr1".to_string(), test_sequence(len));
        ReferenceWindowBuilder::new(sequences, anchor)
    }

    fn snv_at(builder: &ReferenceWindowBuilder, pos: u64) -> VariantRecord {
        let nuc = builder.sequences["chr1"][pos as usize - 1];
        let alt = NUCLEOTIDES[(nucleotide_index(nuc).unwrap() + 1) % 4];
        VariantRecord::new(
            "chr1",
            pos as i64,
            &(nuc as char).to_string(),
            &(alt as char).to_string(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn one_hot_encoding() {
        let encoding = one_hot(b"ACGTN");
        assert_eq!(encoding.shape(), &[5, 4]);
        assert_eq!(encoding.row(2).to_vec(), vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(encoding.row(4).sum(), 0.0);
    }

    #[test]
    fn centered_window() {
        let builder = test_builder(1000, Anchor::Center);
        let variant = snv_at(&builder, 100);
        let (ref_window, alt_window) = builder.build(&variant, 101).unwrap();

        assert_eq!(ref_window.length(), 101);
        assert_eq!(ref_window.shape(), alt_window.shape());
        assert_eq!(ref_window.anchor_pos(), 50);
        assert_eq!(ref_window.variant_span(), 50..51);
    }

    #[test]
    fn substitution_only_changes_allele_span() {
        let builder = test_builder(1000, Anchor::Center);
        for pos in &[51, 100, 500, 950] {
            let variant = snv_at(&builder, *pos);
            let (ref_window, alt_window) = builder.build(&variant, 101).unwrap();
            let span = alt_window.variant_span();
            for i in 0..ref_window.length() {
                let same = ref_window.encoding().row(i) == alt_window.encoding().row(i);
                assert_eq!(same, !span.contains(&i), "position {} of {}", i, pos);
            }
        }

        let seq = &builder.sequences["chr1"];
        let ref_allele = String::from_utf8(seq[299..302].to_vec()).unwrap();
        let alt_allele: String = ref_allele
            .bytes()
            .map(|nuc| NUCLEOTIDES[(nucleotide_index(nuc).unwrap() + 2) % 4] as char)
            .collect();
        let variant = VariantRecord::new("chr1", 300, &ref_allele, &alt_allele, None).unwrap();
        let (ref_window, alt_window) = builder.build(&variant, 21).unwrap();
        let diff: Vec<usize> = (0..21)
            .filter(|i| ref_window.encoding().row(*i) != alt_window.encoding().row(*i))
            .collect();
        assert_eq!(diff, vec![10, 11, 12]);
    }

    #[test]
    fn indels_keep_window_length() {
        let builder = test_builder(1000, Anchor::Center);
        let seq = &builder.sequences["chr1"];
        let ref_allele = String::from_utf8(seq[199..203].to_vec()).unwrap();
        let deletion = VariantRecord::new("chr1", 200, &ref_allele, &ref_allele[..1], None)
            .unwrap();
        let (ref_window, alt_window) = builder.build(&deletion, 51).unwrap();
        assert_eq!(ref_window.shape(), alt_window.shape());
        assert_eq!(alt_window.variant_span(), 25..26);
        assert_eq!(ref_window.variant_span(), 25..29);
        assert_eq!(alt_window.encoding().row(26), one_hot(&seq[203..204]).row(0));
    }

    #[test]
    fn window_past_sequence_start() {
        let builder = test_builder(1000, Anchor::Center);
        let variant = snv_at(&builder, 1);
        let err = builder.build(&variant, 101).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WindowOutOfBounds);

        let variant = snv_at(&builder, 51);
        assert!(builder.build(&variant, 101).is_ok());
    }

    #[test]
    fn window_past_sequence_end() {
        let builder = test_builder(1000, Anchor::Center);
        assert!(builder.build(&snv_at(&builder, 950), 101).is_ok());
        let err = builder.build(&snv_at(&builder, 951), 101).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WindowOutOfBounds);
    }

    #[test]
    fn offset_anchor() {
        let builder = test_builder(1000, Anchor::Offset(0));
        let variant = snv_at(&builder, 1);
        let (ref_window, _) = builder.build(&variant, 101).unwrap();
        assert_eq!(ref_window.anchor_pos(), 1);
        assert_eq!(ref_window.variant_span(), 0..1);
    }

    #[test]
    fn unknown_sequence() {
        let builder = test_builder(100, Anchor::Center);
        let variant = VariantRecord::new("chrX", 50, "A", "C", None).unwrap();
        let err = builder.build(&variant, 11).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownSequence);
    }

    #[test]
    fn reverse_complement_mirrors_span() {
        let window = SequenceWindow::from_bases(1, b"AACGT", 1..3);
        let rc = window.reverse_complement();
        assert_eq!(rc.encoding(), &one_hot(b"ACGTT"));
        assert_eq!(rc.variant_span(), 2..4);
        assert_eq!(rc.reverse_complement(), window);
    }
}
