//! Reference FASTA and BED region loading.
use crate::error::Error;
use crate::Result;
use bio::utils::Interval;
use log::{debug, info};
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// BED regions grouped by sequence name, 0-based half-open
pub type Regions = HashMap<String, Vec<Interval<u64>>>;

/// Reference sequences keyed by FASTA ID, upper-cased
pub type SequenceMap = HashMap<String, Vec<u8>>;

/// Reads a FASTA file, which may be compressed
pub fn fasta_from_path<P: AsRef<Path>>(path: P) -> Result<SequenceMap> {
    info!("Reading reference FASTA...");
    let (rdr, format) = niffler::from_path(path.as_ref())?;
    debug!("Reference compression detected as {:?}", format);
    create_fasta_records(bio::io::fasta::Reader::new(rdr))
}

/// Collects every FASTA record, upper-cased
pub fn create_fasta_records<T: std::io::Read>(
    rdr: bio::io::fasta::Reader<T>,
) -> Result<SequenceMap> {
    let mut fasta_records = SequenceMap::new();
    for record in rdr.records() {
        let record = record?;
        debug!(
            "Loaded sequence {} of length {}",
            record.id(),
            record.seq().len()
        );
        fasta_records.insert(record.id().to_string(), record.seq().to_ascii_uppercase());
    }
    Ok(fasta_records)
}

/// Reads a BED file, which may be compressed
pub fn regions_from_path<P: AsRef<Path>>(path: P) -> Result<Regions> {
    let (rdr, _) = niffler::from_path(path.as_ref())?;
    let mut regions = Regions::new();
    create_regions(rdr, &mut regions)?;
    debug!("Loaded regions on {} sequences", regions.len());
    Ok(regions)
}

/// Adds the intervals of a BED stream to `map`. Only the first three columns are used.
/// Comment, `track` and `browser` lines are skipped.
pub fn create_regions<T: std::io::Read>(rdr: T, map: &mut Regions) -> Result<()> {
    for (i, line) in BufReader::new(rdr).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty()
            || line.starts_with('#')
            || line.starts_with("track")
            || line.starts_with("browser")
        {
            continue;
        }

        let mut fields = line.split('\t');
        let (chrom, start, end) = match (fields.next(), fields.next(), fields.next()) {
            (Some(chrom), Some(start), Some(end)) => (chrom, start, end),
            _ => return Err(Error::BedRecordError(i + 1)),
        };
        let start = start
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::BedRecordError(i + 1))?;
        let end = end
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::BedRecordError(i + 1))?;
        let interval = Interval::new(start..end)
            .map_err(|_| Error::IncorrectInterval(i + 1, start, end))?;
        map.entry(chrom.to_string()).or_default().push(interval);
    }
    Ok(())
}

/// Checks if a 0-based position on `chrom` is covered by any region
pub fn in_regions(regions: &Regions, chrom: &str, pos: u64) -> bool {
    match regions.get(chrom) {
        Some(intervals) => intervals.iter().any(|region| region.contains(&pos)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fasta_is_upper_cased() {
        let fasta = b">chr1 test\nacgtN\nGGCC\n>chr2\nTTTT\n";
        let records = create_fasta_records(bio::io::fasta::Reader::new(&fasta[..])).unwrap();
        assert_eq!(records["chr1"], b"ACGTNGGCC".to_vec());
        assert_eq!(records["chr2"].len(), 4);
    }

    #[test]
    fn bed_regions_are_half_open() {
        let bed = b"chr1\t10\t20\nchr1\t50\t60\n";
        let mut regions = Regions::new();
        create_regions(&bed[..], &mut regions).unwrap();

        assert!(in_regions(&regions, "chr1", 10));
        assert!(in_regions(&regions, "chr1", 55));
        assert!(!in_regions(&regions, "chr1", 20));
        assert!(!in_regions(&regions, "chr2", 15));
    }

    #[test]
    fn bed_extra_columns_and_headers() {
        let bed = b"track name=test\n# comment\n\nchr2\t0\t5\tpeak1\t900\t+\n";
        let mut regions = Regions::new();
        create_regions(&bed[..], &mut regions).unwrap();
        assert_eq!(regions["chr2"].len(), 1);
        assert!(in_regions(&regions, "chr2", 4));
    }

    #[test]
    fn malformed_bed_lines() {
        let mut regions = Regions::new();
        assert!(matches!(
            create_regions(&b"chr1\t10\n"[..], &mut regions),
            Err(Error::BedRecordError(1))
        ));
        assert!(matches!(
            create_regions(&b"chr1\t1\t2\nchr1\tten\t20\n"[..], &mut regions),
            Err(Error::BedRecordError(2))
        ));
        assert!(matches!(
            create_regions(&b"chr1\t20\t10\n"[..], &mut regions),
            Err(Error::IncorrectInterval(1, 20, 10))
        ));
    }
}
