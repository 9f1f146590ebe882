//! Coverage-bucketed variant-count thresholds.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// One coverage bucket and its minimum variant requirement.
///
/// A rule without an upper coverage bound is a *percentage* rule: its
/// `min_variant` is a percentage of coverage rather than a read count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    /// Inclusive lower coverage bound.
    pub min_coverage: u32,
    /// Inclusive upper coverage bound; `None` is unbounded.
    pub max_coverage: Option<u32>,
    /// Minimum variant reads, or percentage for unbounded rules.
    pub min_variant: u32,
}

impl Rule {
    /// Construct a rule.
    pub fn new(min_coverage: u32, max_coverage: Option<u32>, min_variant: u32) -> Self {
        Self {
            min_coverage,
            max_coverage,
            min_variant,
        }
    }

    /// Whether `coverage` falls in this bucket.
    pub fn covers(&self, coverage: u32) -> bool {
        coverage >= self.min_coverage && self.max_coverage.map_or(true, |max| coverage <= max)
    }

    /// Whether the threshold is expressed as a percentage of coverage.
    pub fn is_percentage(&self) -> bool {
        self.max_coverage.is_none()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max_coverage {
            Some(max) => write!(f, "{},{},{}", self.min_coverage, max, self.min_variant),
            None => write!(f, "{},*,{}", self.min_coverage, self.min_variant),
        }
    }
}

/// Errors raised while parsing or validating rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    /// A rule string did not have the `min,max,count` shape.
    #[error("invalid rule '{0}': expected 'min,max,count' with max '*' for unbounded")]
    Malformed(String),
    /// No rules were configured.
    #[error("rule table is empty")]
    Empty,
    /// Lower bound exceeds upper bound.
    #[error("rule {index} has min coverage above max coverage")]
    InvertedRange {
        /// Position of the offending rule.
        index: usize,
    },
    /// Table does not start at coverage 0.
    #[error("rule table starts at coverage {found}, expected 0")]
    MissingLowerBound {
        /// First configured coverage.
        found: u32,
    },
    /// Consecutive rules leave coverage values uncovered.
    #[error("rule {index} starts at {found}; expected {expected} (gap in coverage)")]
    Gap {
        /// Position of the offending rule.
        index: usize,
        /// Coverage the rule should start at.
        expected: u32,
        /// Coverage it actually starts at.
        found: u32,
    },
    /// Consecutive rules cover the same coverage value.
    #[error("rule {index} starts at {found}; expected {expected} (overlapping coverage)")]
    Overlap {
        /// Position of the offending rule.
        index: usize,
        /// Coverage the rule should start at.
        expected: u32,
        /// Coverage it actually starts at.
        found: u32,
    },
    /// An unbounded rule is followed by more rules.
    #[error("rule {index} is unbounded but is not the last rule")]
    UnboundedNotLast {
        /// Position of the offending rule.
        index: usize,
    },
    /// Count thresholds decrease as coverage increases.
    #[error("rule {index} lowers the variant count threshold")]
    NotMonotonic {
        /// Position of the offending rule.
        index: usize,
    },
}

impl FromStr for Rule {
    type Err = RuleError;

    /// Parse `min,max,count`; `max` may be `*` (or a value ≥ `i32::MAX`) for unbounded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || RuleError::Malformed(s.to_string());
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [min, max, count] = parts.as_slice() else {
            return Err(malformed());
        };
        let min = min.parse::<u32>().map_err(|_| malformed())?;
        let max = match *max {
            "*" => None,
            value => {
                let parsed = value.parse::<u64>().map_err(|_| malformed())?;
                (parsed < i32::MAX as u64).then_some(parsed as u32)
            }
        };
        let count = count.parse::<u32>().map_err(|_| malformed())?;
        Ok(Rule::new(min, max, count))
    }
}

/// Validated, ordered rules for one sample role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    /// Validate and wrap a rule list.
    ///
    /// Rules must start at coverage 0, be contiguous without gaps or
    /// overlaps, keep an unbounded rule last, and never lower a count
    /// threshold as coverage grows.
    pub fn new(rules: Vec<Rule>) -> Result<Self, RuleError> {
        let first = rules.first().ok_or(RuleError::Empty)?;
        if first.min_coverage != 0 {
            return Err(RuleError::MissingLowerBound {
                found: first.min_coverage,
            });
        }

        let mut last_count: Option<u32> = None;
        for (index, rule) in rules.iter().enumerate() {
            if let Some(max) = rule.max_coverage {
                if rule.min_coverage > max {
                    return Err(RuleError::InvertedRange { index });
                }
            } else if index + 1 != rules.len() {
                return Err(RuleError::UnboundedNotLast { index });
            }

            if index > 0 {
                let expected = rules[index - 1]
                    .max_coverage
                    .map_or(u32::MAX, |max| max.saturating_add(1));
                match rule.min_coverage.cmp(&expected) {
                    std::cmp::Ordering::Greater => {
                        return Err(RuleError::Gap {
                            index,
                            expected,
                            found: rule.min_coverage,
                        })
                    }
                    std::cmp::Ordering::Less => {
                        return Err(RuleError::Overlap {
                            index,
                            expected,
                            found: rule.min_coverage,
                        })
                    }
                    std::cmp::Ordering::Equal => {}
                }
            }

            if !rule.is_percentage() {
                if last_count.is_some_and(|previous| rule.min_variant < previous) {
                    return Err(RuleError::NotMonotonic { index });
                }
                last_count = Some(rule.min_variant);
            }
        }

        Ok(Self { rules })
    }

    /// Default control thresholds: 3 reads up to 20x, 4 up to 50x, then 10%.
    pub fn default_control() -> Self {
        Self {
            rules: vec![
                Rule::new(0, Some(20), 3),
                Rule::new(21, Some(50), 4),
                Rule::new(51, None, 10),
            ],
        }
    }

    /// Default test thresholds: 3 reads up to 20x, 4 up to 50x, then 5%.
    pub fn default_test() -> Self {
        Self {
            rules: vec![
                Rule::new(0, Some(20), 3),
                Rule::new(21, Some(50), 4),
                Rule::new(51, None, 5),
            ],
        }
    }

    /// Rule whose bucket contains `coverage`.
    pub fn rule_for(&self, coverage: u32) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.covers(coverage))
    }

    /// Reads an allele needs at `coverage`: the bucket's count, its
    /// percentage of coverage for unbounded rules, or 2 when no rule applies.
    pub fn min_variant_reads(&self, coverage: u32) -> u32 {
        match self.rule_for(coverage) {
            Some(rule) if rule.is_percentage() => {
                (u64::from(rule.min_variant) * u64::from(coverage) / 100) as u32
            }
            Some(rule) => rule.min_variant,
            None => 2,
        }
    }

    /// Rules in coverage order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}
