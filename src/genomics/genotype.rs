//! Two-pass rule-based diploid genotype calling.
//!
//! Pass 1 is strict: the largest variant must clear the coverage rule and a
//! quality-weighted vote. Pass 2 relaxes percentage rules and the vote but
//! requires the variant on both strands. Whichever pass keeps the position
//! also decides which alleles enter the genotype.

use std::fmt;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::genomics::{Base, NucleotideSummary, RuleTable};

/// Which set of thresholds an evaluation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Full rule threshold and vote percentage, no strand requirement.
    Strict,
    /// Relaxed thresholds, allele must appear on both strands.
    Lenient,
}

/// Numeric knobs of the two passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallerThresholds {
    /// Minimum share (percent) of total base quality an allele needs on pass 1.
    pub weighted_vote_percentage: f64,
    /// Minimum share (percent) of total base quality an allele needs on pass 2.
    pub lenient_vote_percentage: f64,
    /// Factor applied to percentage rules on pass 2.
    pub lenient_rule_fraction: f64,
}

impl Default for CallerThresholds {
    fn default() -> Self {
        Self {
            weighted_vote_percentage: 10.0,
            lenient_vote_percentage: 5.0,
            lenient_rule_fraction: 0.5,
        }
    }
}

/// Unordered diploid allele pair, stored in base order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Genotype {
    first: Base,
    second: Base,
}

impl Genotype {
    /// Genotype carrying `base` twice.
    pub fn homozygous(base: Base) -> Self {
        Self {
            first: base,
            second: base,
        }
    }

    /// Genotype carrying both alleles.
    pub fn heterozygous(a: Base, b: Base) -> Self {
        Self {
            first: a.min(b),
            second: a.max(b),
        }
    }

    /// Both alleles in base order.
    pub fn alleles(&self) -> [Base; 2] {
        [self.first, self.second]
    }

    /// Both alleles identical.
    pub fn is_homozygous(&self) -> bool {
        self.first == self.second
    }

    /// Alleles differ.
    pub fn is_heterozygous(&self) -> bool {
        !self.is_homozygous()
    }

    /// Whether `base` is one of the alleles.
    pub fn contains(&self, base: Base) -> bool {
        self.first == base || self.second == base
    }

    /// Both alleles equal the reference.
    pub fn is_homozygous_reference(&self, reference: Base) -> bool {
        self.first == reference && self.second == reference
    }

    /// Distinct non-reference alleles in base order.
    pub fn alt_alleles(&self, reference: Base) -> Vec<Base> {
        let mut alts: Vec<Base> = self
            .alleles()
            .into_iter()
            .filter(|&b| b != reference)
            .collect();
        alts.dedup();
        alts
    }

    /// VCF-style allele indices such as `0/1`, relative to `reference` and `alts`.
    ///
    /// Returns `None` if an allele is neither the reference nor listed in `alts`.
    pub fn indices(&self, reference: Base, alts: &[Base]) -> Option<String> {
        let index = |base: Base| {
            if base == reference {
                Some(0)
            } else {
                alts.iter().position(|&alt| alt == base).map(|i| i + 1)
            }
        };
        let mut pair = [index(self.first)?, index(self.second)?];
        pair.sort_unstable();
        Some(format!("{}/{}", pair[0], pair[1]))
    }
}

impl fmt::Display for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.first, self.second)
    }
}

/// Outcome of evaluating one sample at one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleCall {
    /// Pass that kept the position, if any.
    pub keeper: Option<Pass>,
    /// Called genotype, if any allele cleared the thresholds.
    pub genotype: Option<Genotype>,
}

/// Rule-based genotype caller for one sample role.
#[derive(Debug, Clone, Copy)]
pub struct GenotypeCaller<'a> {
    rules: &'a RuleTable,
    thresholds: CallerThresholds,
}

impl<'a> GenotypeCaller<'a> {
    /// Bind a caller to a rule table.
    pub fn new(rules: &'a RuleTable, thresholds: CallerThresholds) -> Self {
        Self { rules, thresholds }
    }

    fn passes_count(&self, count: u32, coverage: u32, pass: Pass) -> bool {
        let Some(rule) = self.rules.rule_for(coverage) else {
            return false;
        };
        if rule.is_percentage() {
            if coverage == 0 {
                return false;
            }
            let percentage = 100.0 * f64::from(count) / f64::from(coverage);
            let required = match pass {
                Pass::Strict => f64::from(rule.min_variant),
                Pass::Lenient => f64::from(rule.min_variant) * self.thresholds.lenient_rule_fraction,
            };
            percentage >= required
        } else {
            count >= rule.min_variant
        }
    }

    fn passes_vote(&self, allele_quality: u32, total_quality: u32, pass: Pass) -> bool {
        if total_quality == 0 {
            return false;
        }
        let share = 100.0 * f64::from(allele_quality) / f64::from(total_quality);
        let required = match pass {
            Pass::Strict => self.thresholds.weighted_vote_percentage,
            Pass::Lenient => self.thresholds.lenient_vote_percentage,
        };
        share >= required
    }

    fn allele_passes(&self, summary: &NucleotideSummary, base: Base, pass: Pass) -> bool {
        let tally = summary.tally(base);
        if tally.count() == 0 {
            return false;
        }
        if pass == Pass::Lenient && !tally.on_both_strands() {
            return false;
        }
        self.passes_count(tally.count(), summary.coverage(), pass)
            && self.passes_vote(tally.quality_sum(), summary.total_quality(), pass)
    }

    /// Pass under which the largest variant keeps this position, if any.
    pub fn keeper_pass(&self, summary: &NucleotideSummary, reference: Base) -> Option<Pass> {
        let variant = summary.largest_variant(reference)?;
        [Pass::Strict, Pass::Lenient]
            .into_iter()
            .find(|&pass| self.allele_passes(summary, variant, pass))
    }

    /// Genotype from every allele clearing `pass`, reference included.
    ///
    /// More than two qualifying alleles are ranked by count, then reference
    /// first, then quality sum; the top two form the genotype.
    pub fn genotype(&self, summary: &NucleotideSummary, reference: Base, pass: Pass) -> Option<Genotype> {
        let mut alleles: Vec<Base> = Base::ALL
            .into_iter()
            .filter(|&base| self.allele_passes(summary, base, pass))
            .collect();

        match alleles.as_slice() {
            [] => None,
            [only] => Some(Genotype::homozygous(*only)),
            [a, b] => Some(Genotype::heterozygous(*a, *b)),
            _ => {
                alleles.sort_by(|&a, &b| {
                    let (ta, tb) = (summary.tally(a), summary.tally(b));
                    tb.count()
                        .cmp(&ta.count())
                        .then_with(|| (b == reference).cmp(&(a == reference)))
                        .then_with(|| tb.quality_sum().cmp(&ta.quality_sum()))
                });
                Some(Genotype::heterozygous(alleles[0], alleles[1]))
            }
        }
    }

    /// Keeper pass plus the genotype under that pass (strict when nothing keeps it).
    pub fn evaluate(&self, summary: &NucleotideSummary, reference: Base) -> SampleCall {
        let keeper = self.keeper_pass(summary, reference);
        SampleCall {
            keeper,
            genotype: self.genotype(summary, reference, keeper.unwrap_or(Pass::Strict)),
        }
    }
}
