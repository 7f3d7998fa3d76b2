//! Link specifications: expression trees deciding when two entities match.
//!
//! A [`LinkSpec`] is a value object. Leaves are measure atoms
//! (`jaccard(name, label)|0.8`), internal nodes combine child mappings with
//! boolean operators (`AND(...)|0.9`, also `OR`, `MINUS`) and re-filter by an
//! operator threshold. Structural equality and hashing make deduplication
//! during active learning cheap, and [`Display`](std::fmt::Display) renders
//! one canonical textual form so equal specifications always serialize
//! identically.

use serde::{Deserialize, Serialize};

use crate::error::SpecError;

/// A link specification expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkSpec {
    /// Leaf: apply a named measure to a source/target property pair, keeping
    /// pairs scoring at least `threshold`.
    Atom {
        measure: String,
        source_property: String,
        target_property: String,
        threshold: f64,
    },
    /// Intersection of child mappings, minimum confidence, re-filtered.
    And {
        left: Box<LinkSpec>,
        right: Box<LinkSpec>,
        threshold: f64,
    },
    /// Union of child mappings, maximum confidence, re-filtered.
    Or {
        left: Box<LinkSpec>,
        right: Box<LinkSpec>,
        threshold: f64,
    },
    /// Left minus right, left confidence, re-filtered.
    Minus {
        left: Box<LinkSpec>,
        right: Box<LinkSpec>,
        threshold: f64,
    },
}

// Thresholds are finite by validation, so bitwise equality/hashing of f64 is
// sound here and gives the structural semantics dedup needs.
impl Eq for LinkSpec {}

impl std::hash::Hash for LinkSpec {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            LinkSpec::Atom {
                measure,
                source_property,
                target_property,
                threshold,
            } => {
                0u8.hash(state);
                measure.hash(state);
                source_property.hash(state);
                target_property.hash(state);
                threshold.to_bits().hash(state);
            }
            LinkSpec::And {
                left,
                right,
                threshold,
            } => {
                1u8.hash(state);
                left.hash(state);
                right.hash(state);
                threshold.to_bits().hash(state);
            }
            LinkSpec::Or {
                left,
                right,
                threshold,
            } => {
                2u8.hash(state);
                left.hash(state);
                right.hash(state);
                threshold.to_bits().hash(state);
            }
            LinkSpec::Minus {
                left,
                right,
                threshold,
            } => {
                3u8.hash(state);
                left.hash(state);
                right.hash(state);
                threshold.to_bits().hash(state);
            }
        }
    }
}

impl LinkSpec {
    /// Build an atom.
    pub fn atom(
        measure: impl Into<String>,
        source_property: impl Into<String>,
        target_property: impl Into<String>,
        threshold: f64,
    ) -> Self {
        LinkSpec::Atom {
            measure: measure.into(),
            source_property: source_property.into(),
            target_property: target_property.into(),
            threshold,
        }
    }

    /// This node's threshold.
    pub fn threshold(&self) -> f64 {
        match self {
            LinkSpec::Atom { threshold, .. }
            | LinkSpec::And { threshold, .. }
            | LinkSpec::Or { threshold, .. }
            | LinkSpec::Minus { threshold, .. } => *threshold,
        }
    }

    /// Copy of this node with its root threshold replaced.
    pub fn with_threshold(&self, threshold: f64) -> LinkSpec {
        let mut spec = self.clone();
        match &mut spec {
            LinkSpec::Atom { threshold: t, .. }
            | LinkSpec::And { threshold: t, .. }
            | LinkSpec::Or { threshold: t, .. }
            | LinkSpec::Minus { threshold: t, .. } => *t = threshold,
        }
        spec
    }

    /// Validate every threshold in the tree: finite and in (0, 1].
    pub fn validate(&self) -> Result<(), SpecError> {
        let threshold = self.threshold();
        if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
            return Err(SpecError::InvalidThreshold { value: threshold });
        }
        match self {
            LinkSpec::Atom { .. } => Ok(()),
            LinkSpec::And { left, right, .. }
            | LinkSpec::Or { left, right, .. }
            | LinkSpec::Minus { left, right, .. } => {
                left.validate()?;
                right.validate()
            }
        }
    }

    /// Measure atoms of the tree, left to right.
    pub fn atoms(&self) -> Vec<&LinkSpec> {
        match self {
            LinkSpec::Atom { .. } => vec![self],
            LinkSpec::And { left, right, .. }
            | LinkSpec::Or { left, right, .. }
            | LinkSpec::Minus { left, right, .. } => {
                let mut atoms = left.atoms();
                atoms.extend(right.atoms());
                atoms
            }
        }
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        match self {
            LinkSpec::Atom { .. } => 1,
            LinkSpec::And { left, right, .. }
            | LinkSpec::Or { left, right, .. }
            | LinkSpec::Minus { left, right, .. } => 1 + left.size() + right.size(),
        }
    }

    /// Tree depth (an atom has depth 1).
    pub fn depth(&self) -> usize {
        match self {
            LinkSpec::Atom { .. } => 1,
            LinkSpec::And { left, right, .. }
            | LinkSpec::Or { left, right, .. }
            | LinkSpec::Minus { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    /// Subtree at a pre-order index (0 is the root).
    pub fn subtree(&self, index: usize) -> Option<&LinkSpec> {
        fn walk<'a>(spec: &'a LinkSpec, index: usize, counter: &mut usize) -> Option<&'a LinkSpec> {
            if *counter == index {
                return Some(spec);
            }
            *counter += 1;
            match spec {
                LinkSpec::Atom { .. } => None,
                LinkSpec::And { left, right, .. }
                | LinkSpec::Or { left, right, .. }
                | LinkSpec::Minus { left, right, .. } => {
                    walk(left, index, counter).or_else(|| walk(right, index, counter))
                }
            }
        }
        let mut counter = 0;
        walk(self, index, &mut counter)
    }

    /// Copy of the tree with the subtree at a pre-order index replaced.
    pub fn with_replaced(&self, index: usize, replacement: LinkSpec) -> LinkSpec {
        fn walk(spec: &LinkSpec, index: usize, counter: &mut usize, replacement: &LinkSpec) -> LinkSpec {
            if *counter == index {
                return replacement.clone();
            }
            *counter += 1;
            match spec {
                LinkSpec::Atom { .. } => spec.clone(),
                LinkSpec::And {
                    left,
                    right,
                    threshold,
                } => LinkSpec::And {
                    left: Box::new(walk(left, index, counter, replacement)),
                    right: Box::new(walk(right, index, counter, replacement)),
                    threshold: *threshold,
                },
                LinkSpec::Or {
                    left,
                    right,
                    threshold,
                } => LinkSpec::Or {
                    left: Box::new(walk(left, index, counter, replacement)),
                    right: Box::new(walk(right, index, counter, replacement)),
                    threshold: *threshold,
                },
                LinkSpec::Minus {
                    left,
                    right,
                    threshold,
                } => LinkSpec::Minus {
                    left: Box::new(walk(left, index, counter, replacement)),
                    right: Box::new(walk(right, index, counter, replacement)),
                    threshold: *threshold,
                },
            }
        }
        let mut counter = 0;
        walk(self, index, &mut counter, &replacement)
    }
}

impl std::fmt::Display for LinkSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkSpec::Atom {
                measure,
                source_property,
                target_property,
                threshold,
            } => write!(f, "{measure}({source_property}, {target_property})|{threshold}"),
            LinkSpec::And {
                left,
                right,
                threshold,
            } => write!(f, "AND({left}, {right})|{threshold}"),
            LinkSpec::Or {
                left,
                right,
                threshold,
            } => write!(f, "OR({left}, {right})|{threshold}"),
            LinkSpec::Minus {
                left,
                right,
                threshold,
            } => write!(f, "MINUS({left}, {right})|{threshold}"),
        }
    }
}

impl std::str::FromStr for LinkSpec {
    type Err = SpecError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser {
            input,
            chars: input.char_indices().collect(),
            pos: 0,
        };
        let spec = parser.parse_spec()?;
        parser.skip_whitespace();
        if parser.pos < parser.chars.len() {
            return Err(SpecError::Parse {
                message: format!("unexpected trailing input at byte {}", parser.byte_offset()),
            });
        }
        Ok(spec)
    }
}

// ---------------------------------------------------------------------------
// Textual form parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl Parser<'_> {
    fn parse_spec(&mut self) -> Result<LinkSpec, SpecError> {
        let head = self.parse_identifier()?;
        self.expect('(')?;

        let spec = match head.to_ascii_uppercase().as_str() {
            op @ ("AND" | "OR" | "MINUS") => {
                let left = Box::new(self.parse_spec()?);
                self.expect(',')?;
                let right = Box::new(self.parse_spec()?);
                self.expect(')')?;
                let threshold = self.parse_threshold()?;
                match op {
                    "AND" => LinkSpec::And {
                        left,
                        right,
                        threshold,
                    },
                    "OR" => LinkSpec::Or {
                        left,
                        right,
                        threshold,
                    },
                    _ => LinkSpec::Minus {
                        left,
                        right,
                        threshold,
                    },
                }
            }
            _ => {
                let source_property = self.parse_identifier()?;
                self.expect(',')?;
                let target_property = self.parse_identifier()?;
                self.expect(')')?;
                let threshold = self.parse_threshold()?;
                LinkSpec::atom(head, source_property, target_property, threshold)
            }
        };
        Ok(spec)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.get(self.pos), Some((_, c)) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn byte_offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.input.len())
    }

    fn parse_identifier(&mut self) -> Result<String, SpecError> {
        self.skip_whitespace();
        let start = self.pos;
        while matches!(
            self.chars.get(self.pos),
            Some((_, c)) if !matches!(c, '(' | ')' | ',' | '|') && !c.is_whitespace()
        ) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(SpecError::Parse {
                message: format!("expected identifier at byte {}", self.byte_offset()),
            });
        }
        Ok(self.chars[start..self.pos].iter().map(|(_, c)| c).collect())
    }

    fn expect(&mut self, expected: char) -> Result<(), SpecError> {
        self.skip_whitespace();
        match self.chars.get(self.pos) {
            Some((_, c)) if *c == expected => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(SpecError::Parse {
                message: format!("expected '{expected}' at byte {}", self.byte_offset()),
            }),
        }
    }

    fn parse_threshold(&mut self) -> Result<f64, SpecError> {
        self.expect('|')?;
        self.skip_whitespace();
        let start = self.pos;
        while matches!(
            self.chars.get(self.pos),
            Some((_, c)) if c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')
        ) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().map(|(_, c)| c).collect();
        text.parse::<f64>().map_err(|_| SpecError::Parse {
            message: format!("expected threshold at byte {}", self.byte_offset()),
        })
    }
}
