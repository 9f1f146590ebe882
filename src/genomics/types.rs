use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Nucleotide that can be called as an allele.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum Base {
    /// Adenine.
    A,
    /// Cytosine.
    C,
    /// Guanine.
    G,
    /// Thymine.
    T,
}

impl Base {
    /// All callable bases in index order.
    pub const ALL: [Base; 4] = [Base::A, Base::C, Base::G, Base::T];

    /// Parse an ASCII nucleotide, case-insensitively. `N` and IUPAC codes yield `None`.
    pub fn from_ascii(byte: u8) -> Option<Self> {
        match byte {
            b'A' | b'a' => Some(Base::A),
            b'C' | b'c' => Some(Base::C),
            b'G' | b'g' => Some(Base::G),
            b'T' | b't' => Some(Base::T),
            _ => None,
        }
    }

    /// Dense index in `[0, 4)`.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Uppercase ASCII representation.
    pub fn as_ascii(self) -> u8 {
        match self {
            Base::A => b'A',
            Base::C => b'C',
            Base::G => b'G',
            Base::T => b'T',
        }
    }

    /// Character representation.
    pub fn as_char(self) -> char {
        self.as_ascii() as char
    }
}

impl fmt::Display for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Strand an alignment maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strand {
    /// Forward strand.
    Forward,
    /// Reverse complement strand.
    Reverse,
}

/// Which of the paired samples a stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum SampleRole {
    /// Matched normal.
    Control,
    /// Tumour or otherwise test sample.
    Test,
}

impl SampleRole {
    /// Both roles, control first.
    pub const BOTH: [SampleRole; 2] = [SampleRole::Control, SampleRole::Test];

    /// Dense index: control = 0, test = 1.
    pub fn index(self) -> usize {
        match self {
            SampleRole::Control => 0,
            SampleRole::Test => 1,
        }
    }
}

impl fmt::Display for SampleRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleRole::Control => f.write_str("control"),
            SampleRole::Test => f.write_str("test"),
        }
    }
}

/// CIGAR operation kinds describing how a read aligns to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOpKind {
    /// Alignment match or mismatch (`M`).
    Match,
    /// Insertion relative to the reference (`I`).
    Insertion,
    /// Deletion relative to the reference (`D`).
    Deletion,
    /// Skipped reference region, e.g. an intron (`N`).
    Skip,
    /// Soft clipping (sequence present in read only).
    SoftClip,
    /// Hard clipping (trimmed sequence not present in read).
    HardClip,
    /// Silent padding (`P`).
    Padding,
    /// Sequence match (`=`).
    SequenceMatch,
    /// Sequence mismatch (`X`).
    SequenceMismatch,
}

impl CigarOpKind {
    /// Whether the operation advances along the reference.
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Deletion
                | CigarOpKind::Skip
                | CigarOpKind::SequenceMatch
                | CigarOpKind::SequenceMismatch
        )
    }

    /// Whether the operation advances along the read sequence.
    pub fn consumes_read(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Insertion
                | CigarOpKind::SoftClip
                | CigarOpKind::SequenceMatch
                | CigarOpKind::SequenceMismatch
        )
    }

    /// Parse a SAM CIGAR operation character.
    pub fn from_sam(symbol: u8) -> Option<Self> {
        Some(match symbol {
            b'M' => CigarOpKind::Match,
            b'I' => CigarOpKind::Insertion,
            b'D' => CigarOpKind::Deletion,
            b'N' => CigarOpKind::Skip,
            b'S' => CigarOpKind::SoftClip,
            b'H' => CigarOpKind::HardClip,
            b'P' => CigarOpKind::Padding,
            b'=' => CigarOpKind::SequenceMatch,
            b'X' => CigarOpKind::SequenceMismatch,
            _ => return None,
        })
    }
}

/// CIGAR operation with length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    /// Operation kind.
    pub kind: CigarOpKind,
    /// Number of bases affected by the operation.
    pub len: u32,
}

impl CigarOp {
    /// Construct a new CIGAR operation.
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        Self { kind, len }
    }

    /// Parse a SAM CIGAR string such as `10M2I5M`. `*` yields an empty CIGAR.
    pub fn parse_sam(cigar: &str) -> Option<Vec<CigarOp>> {
        if cigar == "*" {
            return Some(Vec::new());
        }
        let mut ops = Vec::new();
        let mut len: u32 = 0;
        let mut saw_digit = false;
        for byte in cigar.bytes() {
            if byte.is_ascii_digit() {
                len = len.checked_mul(10)?.checked_add(u32::from(byte - b'0'))?;
                saw_digit = true;
            } else {
                if !saw_digit {
                    return None;
                }
                ops.push(CigarOp::new(CigarOpKind::from_sam(byte)?, len));
                len = 0;
                saw_digit = false;
            }
        }
        (!saw_digit).then_some(ops)
    }
}

/// SAM flag bits relevant to pileup eligibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadFlags {
    /// Read is unmapped.
    pub unmapped: bool,
    /// Secondary alignment.
    pub secondary: bool,
    /// Failed platform/vendor quality checks.
    pub qc_failed: bool,
    /// PCR or optical duplicate.
    pub duplicate: bool,
}

impl ReadFlags {
    /// Decode from a raw SAM flag word.
    pub fn from_sam(flag: u16) -> Self {
        Self {
            unmapped: flag & 0x4 != 0,
            secondary: flag & 0x100 != 0,
            qc_failed: flag & 0x200 != 0,
            duplicate: flag & 0x400 != 0,
        }
    }

    /// Whether the read may contribute evidence at all.
    pub fn is_usable(&self, include_duplicates: bool) -> bool {
        !(self.unmapped || self.secondary || self.qc_failed || (self.duplicate && !include_duplicates))
    }
}

/// Aligned read with sequence and quality information.
#[derive(Debug, Clone)]
pub struct AlignedRead {
    /// Read (template) name, shared by both mates of a fragment.
    pub name: Arc<str>,
    /// Reference contig/chromosome name.
    pub chrom: Arc<str>,
    /// 1-based leftmost reference coordinate.
    pub pos: u32,
    /// Mapping quality (Phred-scaled).
    pub mapq: u8,
    /// CIGAR describing the alignment.
    pub cigar: Vec<CigarOp>,
    /// Read sequence stored as uppercase ASCII.
    pub sequence: Arc<[u8]>,
    /// Per-base quality scores in Phred space.
    pub qualities: Arc<[u8]>,
    /// Whether the read maps to the reverse complement strand.
    pub is_reverse: bool,
    /// Eligibility flags.
    pub flags: ReadFlags,
}

impl AlignedRead {
    /// Construct a new aligned read wrapper with mapping quality 60 and no flags set.
    pub fn new(
        name: impl Into<Arc<str>>,
        chrom: impl Into<Arc<str>>,
        pos: u32,
        cigar: Vec<CigarOp>,
        sequence: impl Into<Arc<[u8]>>,
        qualities: impl Into<Arc<[u8]>>,
        is_reverse: bool,
    ) -> Self {
        Self {
            name: name.into(),
            chrom: chrom.into(),
            pos,
            mapq: 60,
            cigar,
            sequence: sequence.into(),
            qualities: qualities.into(),
            is_reverse,
            flags: ReadFlags::default(),
        }
    }

    /// Override the mapping quality.
    pub fn with_mapq(mut self, mapq: u8) -> Self {
        self.mapq = mapq;
        self
    }

    /// Override the eligibility flags.
    pub fn with_flags(mut self, flags: ReadFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Read length inferred from the sequence.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Whether the read carries no sequence.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Number of reference bases spanned by the alignment.
    pub fn reference_span(&self) -> u32 {
        self.cigar
            .iter()
            .filter(|op| op.kind.consumes_reference())
            .map(|op| op.len)
            .sum()
    }

    /// 1-based inclusive alignment end.
    pub fn end(&self) -> u32 {
        self.pos + self.reference_span().saturating_sub(1)
    }

    /// Strand of the alignment.
    pub fn strand(&self) -> Strand {
        if self.is_reverse {
            Strand::Reverse
        } else {
            Strand::Forward
        }
    }

    /// Base at the provided read offset.
    pub fn base_at(&self, offset: usize) -> Option<u8> {
        self.sequence.get(offset).copied()
    }

    /// Quality score at the provided read offset.
    pub fn quality_at(&self, offset: usize) -> Option<u8> {
        self.qualities.get(offset).copied()
    }
}

/// A named reference sequence as declared by a read source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContigInfo {
    /// Contig name.
    pub name: Arc<str>,
    /// Declared length in bases.
    pub length: u32,
}

impl ContigInfo {
    /// Construct contig metadata.
    pub fn new(name: impl Into<Arc<str>>, length: u32) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }
}

/// Ordered contig dictionary shared by both read sources.
#[derive(Debug, Clone)]
pub struct ContigDictionary {
    contigs: Vec<ContigInfo>,
    ordinals: HashMap<Arc<str>, u32>,
}

impl ContigDictionary {
    /// Index a source's declared contigs.
    pub fn new(contigs: Vec<ContigInfo>) -> Self {
        let ordinals = contigs
            .iter()
            .enumerate()
            .map(|(idx, contig)| (Arc::clone(&contig.name), idx as u32))
            .collect();
        Self { contigs, ordinals }
    }

    /// Ordinal of a contig name, if declared.
    pub fn ordinal(&self, name: &str) -> Option<u32> {
        self.ordinals.get(name).copied()
    }

    /// Contig metadata by ordinal.
    pub fn get(&self, ordinal: u32) -> Option<&ContigInfo> {
        self.contigs.get(ordinal as usize)
    }

    /// Number of declared contigs.
    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    /// Whether no contigs are declared.
    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }

    /// Index of the first entry that differs from `other` in name, length or presence.
    pub fn first_mismatch(&self, other: &[ContigInfo]) -> Option<usize> {
        let shared = self.contigs.len().min(other.len());
        (0..shared)
            .find(|&idx| self.contigs[idx] != other[idx])
            .or_else(|| (self.contigs.len() != other.len()).then_some(shared))
    }
}

/// Position on the reference, ordered by the sources' contig order then coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct GenomicPosition {
    /// Contig ordinal within the shared dictionary.
    pub ordinal: u32,
    /// 1-based coordinate.
    pub position: u32,
}

impl GenomicPosition {
    /// Construct a position.
    pub fn new(ordinal: u32, position: u32) -> Self {
        Self { ordinal, position }
    }
}
