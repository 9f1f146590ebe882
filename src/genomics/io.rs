//! Read sources, reference providers and record predicates.
//!
//! The pipeline only depends on the [`RecordSource`], [`ReferenceProvider`]
//! and [`RecordPredicate`] traits. The concrete adapters here cover in-memory
//! fixtures, BAM files (through `rust-htslib`), FASTA references and a
//! minimal tab-delimited alignment format used by the CLI and tests.

use std::collections::VecDeque;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use rust_htslib::bam::{self, record::Cigar, Read as _};
use thiserror::Error;

use crate::genomics::{AlignedRead, CigarOp, CigarOpKind, ContigInfo, ReadFlags};

/// Errors raised by sources and providers.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// htslib failed to open or decode an alignment file.
    #[error("htslib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),
    /// Malformed line in a text input.
    #[error("line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },
}

/// Yields one sample's aligned reads in the source's genomic order.
pub trait RecordSource {
    /// Contig dictionary in the order reads are sorted by.
    fn contigs(&self) -> &[ContigInfo];

    /// Next read, or `None` at end of input.
    fn next_read(&mut self) -> Result<Option<AlignedRead>, SourceError>;
}

/// One chromosome's reference bases.
#[derive(Debug, Clone)]
pub struct ReferenceContig {
    /// Contig name, matched against the read sources' dictionary.
    pub name: Arc<str>,
    /// Uppercase ASCII bases; index 0 is position 1.
    pub bases: Arc<[u8]>,
}

impl ReferenceContig {
    /// Construct a contig, uppercasing the bases.
    pub fn new(name: impl Into<Arc<str>>, bases: &[u8]) -> Self {
        Self {
            name: name.into(),
            bases: bases.to_ascii_uppercase().into(),
        }
    }

    /// Base at a 1-based position.
    pub fn base_at(&self, position: u32) -> Option<u8> {
        position
            .checked_sub(1)
            .and_then(|idx| self.bases.get(idx as usize).copied())
    }

    /// Number of bases.
    pub fn len(&self) -> u32 {
        self.bases.len() as u32
    }

    /// Whether the contig has no bases.
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

/// Yields reference contigs strictly sequentially.
pub trait ReferenceProvider {
    /// Next contig, or `None` once the reference is exhausted.
    fn next_contig(&mut self) -> Result<Option<ReferenceContig>, SourceError>;
}

/// Boolean filter evaluated once per read.
pub trait RecordPredicate: Send + Sync {
    /// Whether the read's bases may contribute quality-weighted evidence.
    fn accepts(&self, read: &AlignedRead) -> bool;
}

impl<F> RecordPredicate for F
where
    F: Fn(&AlignedRead) -> bool + Send + Sync,
{
    fn accepts(&self, read: &AlignedRead) -> bool {
        self(read)
    }
}

/// Accepts reads with mapping quality at or above a floor.
#[derive(Debug, Clone, Copy)]
pub struct MinMappingQuality(pub u8);

impl RecordPredicate for MinMappingQuality {
    fn accepts(&self, read: &AlignedRead) -> bool {
        read.mapq >= self.0
    }
}

/// Record source backed by an in-memory list of reads.
#[derive(Debug, Clone)]
pub struct VecRecordSource {
    contigs: Vec<ContigInfo>,
    reads: VecDeque<AlignedRead>,
}

impl VecRecordSource {
    /// Wrap reads already in dictionary order.
    pub fn new(contigs: Vec<ContigInfo>, reads: Vec<AlignedRead>) -> Self {
        Self {
            contigs,
            reads: reads.into(),
        }
    }
}

impl RecordSource for VecRecordSource {
    fn contigs(&self) -> &[ContigInfo] {
        &self.contigs
    }

    fn next_read(&mut self) -> Result<Option<AlignedRead>, SourceError> {
        Ok(self.reads.pop_front())
    }
}

/// Reference provider backed by in-memory contigs.
#[derive(Debug, Clone, Default)]
pub struct VecReferenceProvider {
    contigs: VecDeque<ReferenceContig>,
}

impl VecReferenceProvider {
    /// Wrap contigs in dictionary order.
    pub fn new(contigs: Vec<ReferenceContig>) -> Self {
        Self {
            contigs: contigs.into(),
        }
    }
}

impl ReferenceProvider for VecReferenceProvider {
    fn next_contig(&mut self) -> Result<Option<ReferenceContig>, SourceError> {
        Ok(self.contigs.pop_front())
    }
}

/// Streaming FASTA reader yielding one contig per call.
#[derive(Debug)]
pub struct FastaReference<R> {
    reader: R,
    pending_header: Option<String>,
    line_number: usize,
}

impl<R: BufRead> FastaReference<R> {
    /// Wrap a buffered FASTA stream.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending_header: None,
            line_number: 0,
        }
    }

    fn read_line(&mut self, buf: &mut String) -> Result<bool, SourceError> {
        buf.clear();
        let read = self.reader.read_line(buf)?;
        self.line_number += 1;
        Ok(read > 0)
    }
}

impl<R: BufRead> ReferenceProvider for FastaReference<R> {
    fn next_contig(&mut self) -> Result<Option<ReferenceContig>, SourceError> {
        let mut line = String::new();
        let header = match self.pending_header.take() {
            Some(header) => header,
            None => loop {
                if !self.read_line(&mut line)? {
                    return Ok(None);
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match trimmed.strip_prefix('>') {
                    Some(header) => break header.to_string(),
                    None => {
                        return Err(SourceError::Parse {
                            line: self.line_number,
                            message: "sequence data before the first FASTA header".to_string(),
                        })
                    }
                }
            },
        };
        let name = header.split_whitespace().next().unwrap_or_default().to_string();

        let mut bases = Vec::new();
        while self.read_line(&mut line)? {
            let trimmed = line.trim();
            if let Some(next) = trimmed.strip_prefix('>') {
                self.pending_header = Some(next.to_string());
                break;
            }
            bases.extend_from_slice(trimmed.as_bytes());
        }
        Ok(Some(ReferenceContig::new(name, &bases)))
    }
}

/// Tab-delimited alignment reader.
///
/// Header lines `@SQ<TAB>name<TAB>length` declare the contig dictionary and
/// must precede the reads. Each read line holds `name chrom pos flag mapq
/// cigar sequence qualities` with 1-based `pos`, a decimal SAM flag and
/// Phred+33 qualities (`*` for none).
#[derive(Debug)]
pub struct TextAlignmentSource<R> {
    lines: std::io::Lines<R>,
    contigs: Vec<ContigInfo>,
    pending: Option<String>,
    line_number: usize,
}

impl<R: BufRead> TextAlignmentSource<R> {
    /// Read the dictionary header and prepare to stream reads.
    pub fn new(reader: R) -> Result<Self, SourceError> {
        let mut source = Self {
            lines: reader.lines(),
            contigs: Vec::new(),
            pending: None,
            line_number: 0,
        };
        while let Some(line) = source.lines.next() {
            let line = line?;
            source.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            match line.strip_prefix("@SQ\t") {
                Some(rest) => {
                    let contig = source.parse_contig(rest)?;
                    source.contigs.push(contig);
                }
                None => {
                    source.pending = Some(line);
                    break;
                }
            }
        }
        Ok(source)
    }

    fn error(&self, message: impl Into<String>) -> SourceError {
        SourceError::Parse {
            line: self.line_number,
            message: message.into(),
        }
    }

    fn parse_contig(&self, rest: &str) -> Result<ContigInfo, SourceError> {
        let mut fields = rest.split('\t');
        let (Some(name), Some(length)) = (fields.next(), fields.next()) else {
            return Err(self.error("expected '@SQ<TAB>name<TAB>length'"));
        };
        let length = length
            .trim()
            .parse::<u32>()
            .map_err(|_| self.error(format!("invalid contig length '{length}'")))?;
        Ok(ContigInfo::new(name, length))
    }

    fn parse_read(&self, line: &str) -> Result<AlignedRead, SourceError> {
        let fields: Vec<&str> = line.split('\t').collect();
        let [name, chrom, pos, flag, mapq, cigar, sequence, qualities] = fields.as_slice() else {
            return Err(self.error(format!("expected 8 tab-separated fields, found {}", fields.len())));
        };
        let pos = pos
            .parse::<u32>()
            .map_err(|_| self.error(format!("invalid position '{pos}'")))?;
        let flag = flag
            .parse::<u16>()
            .map_err(|_| self.error(format!("invalid flag '{flag}'")))?;
        let mapq = mapq
            .parse::<u8>()
            .map_err(|_| self.error(format!("invalid mapping quality '{mapq}'")))?;
        let cigar =
            CigarOp::parse_sam(cigar).ok_or_else(|| self.error(format!("invalid CIGAR '{cigar}'")))?;
        let sequence = sequence.as_bytes().to_ascii_uppercase();
        let qualities: Vec<u8> = if *qualities == "*" {
            vec![0; sequence.len()]
        } else {
            qualities.bytes().map(|q| q.saturating_sub(33)).collect()
        };
        if qualities.len() != sequence.len() {
            return Err(self.error("sequence and quality lengths differ"));
        }
        let flags = ReadFlags::from_sam(flag);
        Ok(
            AlignedRead::new(*name, *chrom, pos, cigar, sequence, qualities, flag & 0x10 != 0)
                .with_mapq(mapq)
                .with_flags(flags),
        )
    }
}

impl<R: BufRead> RecordSource for TextAlignmentSource<R> {
    fn contigs(&self) -> &[ContigInfo] {
        &self.contigs
    }

    fn next_read(&mut self) -> Result<Option<AlignedRead>, SourceError> {
        loop {
            let line = match self.pending.take() {
                Some(line) => line,
                None => match self.lines.next() {
                    Some(line) => {
                        self.line_number += 1;
                        line?
                    }
                    None => return Ok(None),
                },
            };
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            return self.parse_read(&line).map(Some);
        }
    }
}

/// BAM/SAM/CRAM reader over htslib.
pub struct BamRecordSource {
    reader: bam::Reader,
    contigs: Vec<ContigInfo>,
    record: bam::Record,
}

impl std::fmt::Debug for BamRecordSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BamRecordSource")
            .field("contigs", &self.contigs.len())
            .finish()
    }
}

impl BamRecordSource {
    /// Open an alignment file and read its contig dictionary.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let reader = bam::Reader::from_path(path)?;
        let header = reader.header();
        let contigs = (0..header.target_count())
            .map(|tid| {
                let name = String::from_utf8_lossy(header.tid2name(tid)).into_owned();
                let length = header.target_len(tid).unwrap_or(0);
                ContigInfo::new(name, length.min(u64::from(u32::MAX)) as u32)
            })
            .collect();
        Ok(Self {
            reader,
            contigs,
            record: bam::Record::new(),
        })
    }

    fn convert(&self) -> AlignedRead {
        let record = &self.record;
        let chrom: Arc<str> = usize::try_from(record.tid())
            .ok()
            .and_then(|tid| self.contigs.get(tid))
            .map_or_else(|| Arc::from("*"), |contig| Arc::clone(&contig.name));
        let cigar = record
            .cigar()
            .iter()
            .map(|op| {
                let (kind, len) = match *op {
                    Cigar::Match(len) => (CigarOpKind::Match, len),
                    Cigar::Ins(len) => (CigarOpKind::Insertion, len),
                    Cigar::Del(len) => (CigarOpKind::Deletion, len),
                    Cigar::RefSkip(len) => (CigarOpKind::Skip, len),
                    Cigar::SoftClip(len) => (CigarOpKind::SoftClip, len),
                    Cigar::HardClip(len) => (CigarOpKind::HardClip, len),
                    Cigar::Pad(len) => (CigarOpKind::Padding, len),
                    Cigar::Equal(len) => (CigarOpKind::SequenceMatch, len),
                    Cigar::Diff(len) => (CigarOpKind::SequenceMismatch, len),
                };
                CigarOp::new(kind, len)
            })
            .collect();
        let name = String::from_utf8_lossy(record.qname()).into_owned();
        let pos = u32::try_from(record.pos() + 1).unwrap_or(0);
        let flags = ReadFlags {
            unmapped: record.is_unmapped(),
            secondary: record.is_secondary(),
            qc_failed: record.is_quality_check_failed(),
            duplicate: record.is_duplicate(),
        };
        AlignedRead::new(
            name,
            chrom,
            pos,
            cigar,
            record.seq().as_bytes(),
            record.qual().to_vec(),
            record.is_reverse(),
        )
        .with_mapq(record.mapq())
        .with_flags(flags)
    }
}

impl RecordSource for BamRecordSource {
    fn contigs(&self) -> &[ContigInfo] {
        &self.contigs
    }

    fn next_read(&mut self) -> Result<Option<AlignedRead>, SourceError> {
        match self.reader.read(&mut self.record) {
            None => Ok(None),
            Some(Err(err)) => Err(err.into()),
            Some(Ok(())) => Ok(Some(self.convert())),
        }
    }
}
