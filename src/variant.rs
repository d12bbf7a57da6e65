//! Validated variant records and VCF/BCF ingestion.
use crate::error::Error;
use crate::genomic::{in_regions, Regions};
use crate::Result;
use log::{debug, info};
use rust_htslib::bcf;
use rust_htslib::bcf::Read as VcfRead;
use std::fmt;
use std::path::Path;

/// Missing value marker used by VCF for IDs and alleles
pub const MISSING: &str = ".";

/// A single substitution between a reference and alternate allele. Only constructed
/// through [`VariantRecord::new`] so every instance satisfies the record invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantRecord {
    chrom: String,
    pos: u64,
    ref_allele: String,
    alt_allele: String,
    id: Option<String>,
}

/// Variant fields as supplied by an upstream source, before validation
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct RawVariant {
    pub chrom: String,
    pub pos: i64,
    pub ref_allele: String,
    pub alt_allele: String,
    pub id: Option<String>,
}

impl VariantRecord {
    /// Validates and creates a record, alleles are upper-cased and an ID of `.` is dropped
    pub fn new<S: Into<String>>(
        chrom: S,
        pos: i64,
        ref_allele: &str,
        alt_allele: &str,
        id: Option<String>,
    ) -> Result<Self> {
        let chrom = chrom.into();
        let ref_allele = ref_allele.to_ascii_uppercase();
        let alt_allele = alt_allele.to_ascii_uppercase();
        let desc = format!("{}:{}{}>{}", chrom, pos, ref_allele, alt_allele);
        let invalid = |msg: &str| Err(Error::InvalidVariant(desc.clone(), msg.to_string()));

        if chrom.is_empty() {
            return invalid("chromosome is empty");
        }
        if pos < 1 {
            return invalid("position must be positive");
        }
        if ref_allele.is_empty() || alt_allele.is_empty() {
            return invalid("alleles must be non-empty");
        }
        if ref_allele == alt_allele {
            return invalid("reference and alternate alleles are identical");
        }
        if let Some(allele) = [&ref_allele, &alt_allele]
            .iter()
            .find(|allele| !is_plain_allele(allele.as_bytes()))
        {
            return Err(Error::InvalidVariant(
                desc.clone(),
                format!("allele `{}` is not a nucleotide sequence", allele),
            ));
        }

        Ok(Self {
            chrom,
            pos: pos as u64,
            ref_allele,
            alt_allele,
            id: id.filter(|id| !id.is_empty() && id != MISSING),
        })
    }

    /// Validates a raw record
    pub fn from_raw(raw: &RawVariant) -> Result<Self> {
        Self::new(
            raw.chrom.clone(),
            raw.pos,
            &raw.ref_allele,
            &raw.alt_allele,
            raw.id.clone(),
        )
    }

    /// Chromosome name
    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    /// 1-based position of the first reference base
    pub fn pos(&self) -> u64 {
        self.pos
    }

    #[allow(missing_docs)]
    pub fn ref_allele(&self) -> &str {
        &self.ref_allele
    }

    #[allow(missing_docs)]
    pub fn alt_allele(&self) -> &str {
        &self.alt_allele
    }

    /// Identifier as supplied by the source
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns the supplied identifier or `chrom:posREF>ALT`
    pub fn variant_id(&self) -> String {
        match self.id {
            Some(ref id) => id.clone(),
            None => self.desc(),
        }
    }

    /// Returns a description of the variant in the form `chrom:posREF>ALT`
    pub fn desc(&self) -> String {
        format!(
            "{}:{}{}>{}",
            self.chrom, self.pos, self.ref_allele, self.alt_allele
        )
    }

    /// The same locus with reference and alternate alleles swapped
    pub fn swapped(&self) -> Self {
        Self {
            chrom: self.chrom.clone(),
            pos: self.pos,
            ref_allele: self.alt_allele.clone(),
            alt_allele: self.ref_allele.clone(),
            id: self.id.clone(),
        }
    }
}

impl fmt::Display for VariantRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.variant_id())
    }
}

impl RawVariant {
    /// Description used for failure records of rejected variants
    pub fn variant_id(&self) -> String {
        match self.id {
            Some(ref id) if id != MISSING && !id.is_empty() => id.clone(),
            _ => format!(
                "{}:{}{}>{}",
                self.chrom, self.pos, self.ref_allele, self.alt_allele
            ),
        }
    }
}

fn is_plain_allele(allele: &[u8]) -> bool {
    allele
        .iter()
        .all(|nuc| matches!(nuc, b'A' | b'C' | b'G' | b'T' | b'N'))
}

/// Reads every record of a VCF/BCF file, splitting multi-allelic records into one raw
/// variant per alternate allele. Split records get the alternate allele appended to
/// their ID, as in `rs1_G`. Records outside `regions` are skipped when regions are
/// supplied. Validation happens later, so malformed alleles are returned as is.
pub fn read_vcf_variants<P: AsRef<Path>>(
    path: P,
    regions: Option<&Regions>,
) -> Result<Vec<RawVariant>> {
    info!("Reading VCF...");
    let mut vcf = bcf::Reader::from_path(path.as_ref())?;
    let header = vcf.header().clone();
    let mut variants = Vec::new();

    for (i, record) in vcf.records().enumerate() {
        debug!("Accessing record {} in the VCF...", i + 1);
        let record = record?;
        let rid = record
            .rid()
            .ok_or_else(|| Error::Config(format!("VCF record {} has no contig", i + 1)))?;
        let chrom = String::from_utf8(header.rid2name(rid)?.to_vec())?;
        let pos = record.pos() + 1;

        if let Some(regions) = regions {
            if !in_regions(regions, &chrom, (pos - 1) as u64) {
                debug!("Record {}:{} is outside the supplied regions", chrom, pos);
                continue;
            }
        }

        let id = String::from_utf8(record.id())?;
        let alleles = record.alleles();
        let ref_allele = match alleles.first() {
            Some(allele) => String::from_utf8(allele.to_vec())?,
            None => String::new(),
        };

        if alleles.len() < 2 {
            variants.push(RawVariant {
                chrom,
                pos,
                ref_allele,
                alt_allele: MISSING.to_string(),
                id: Some(id),
            });
            continue;
        }

        let split = alleles.len() > 2;
        for alt in alleles.iter().skip(1) {
            let alt_allele = String::from_utf8(alt.to_vec())?;
            let id = if split && id != MISSING {
                format!("{}_{}", id, alt_allele)
            } else {
                id.clone()
            };
            variants.push(RawVariant {
                chrom: chrom.clone(),
                pos,
                ref_allele: ref_allele.clone(),
                alt_allele,
                id: Some(id),
            });
        }
    }
    info!("Read {} variants from VCF", variants.len());
    Ok(variants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    #[test]
    fn identical_alleles_are_rejected() {
        for allele in &["A", "c", "GT"] {
            let err = VariantRecord::new("chr1", 100, allele, allele, None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidVariant);
        }
    }

    #[test]
    fn lower_case_is_normalised_before_comparison() {
        let err = VariantRecord::new("chr1", 100, "a", "A", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidVariant);
    }

    #[test]
    fn empty_and_non_positive_records_are_rejected() {
        assert!(VariantRecord::new("chr1", 0, "A", "G", None).is_err());
        assert!(VariantRecord::new("chr1", -3, "A", "G", None).is_err());
        assert!(VariantRecord::new("chr1", 10, "", "G", None).is_err());
        assert!(VariantRecord::new("chr1", 10, "A", "", None).is_err());
        assert!(VariantRecord::new("", 10, "A", "G", None).is_err());
    }

    #[test]
    fn symbolic_alleles_are_rejected() {
        assert!(VariantRecord::new("chr1", 10, "A", "<DEL>", None).is_err());
        assert!(VariantRecord::new("chr1", 10, "A", "*", None).is_err());
        assert!(VariantRecord::new("chr1", 10, "A", ".", None).is_err());
    }

    #[test]
    fn synthesized_identifier() {
        let variant = VariantRecord::new("chr1", 100, "A", "G", None).unwrap();
        assert_eq!(variant.variant_id(), "chr1:100A>G");

        let variant = VariantRecord::new("chr1", 100, "A", "G", Some(".".to_string())).unwrap();
        assert_eq!(variant.id(), None);
        assert_eq!(variant.variant_id(), "chr1:100A>G");

        let variant =
            VariantRecord::new("chr1", 100, "A", "G", Some("rs42".to_string())).unwrap();
        assert_eq!(variant.variant_id(), "rs42");
    }

    #[test]
    fn swapping_alleles() {
        let variant = VariantRecord::new("chr2", 7, "AC", "T", None).unwrap();
        let swapped = variant.swapped();
        assert_eq!(swapped.ref_allele(), "T");
        assert_eq!(swapped.alt_allele(), "AC");
        assert_eq!(swapped.swapped(), variant);
    }

    #[test]
    fn read_multi_allelic_vcf() {
        let mut file = tempfile::Builder::new().suffix(".vcf").tempfile().unwrap();
        write!(
            file,
            "##fileformat=VCFv4.2\n##contig=<ID=chr1,length=1000>\n\
             #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
             chr1\t100\trs1\tA\tG,T\t.\t.\t.\n\
             chr1\t200\t.\tC\tA\t.\t.\t.\n"
        )
        .unwrap();
        file.flush().unwrap();

        let variants = read_vcf_variants(file.path(), None).unwrap();
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0].alt_allele, "G");
        assert_eq!(variants[1].alt_allele, "T");
        assert_eq!(variants[1].pos, 100);
        assert_eq!(variants[0].variant_id(), "rs1_G");
        assert_eq!(variants[1].variant_id(), "rs1_T");
        assert_eq!(
            VariantRecord::from_raw(&variants[2]).unwrap().variant_id(),
            "chr1:200C>A"
        );
    }
}
