//! Observed character data.
//!
//! A [`Site`] maps every taxon to the set of states observed for it. An
//! [`Alignment`] is an ordered list of sites over a fixed taxon list; sites
//! carry a multiplicity and an optional class label that selects the model
//! used for them.

use std::collections::{BTreeMap, HashMap};

use sylva_core::{Result, Summarizable, SylvaError};

use crate::alphabet::{Alphabet, StateSet};

/// Class label of sites that do not name one.
pub const DEFAULT_CLASS: &str = "default";

/// One alignment column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Site {
    states: BTreeMap<String, StateSet>,
    multiplicity: usize,
    class: Option<String>,
}

impl Site {
    /// A site with multiplicity one and no class label.
    pub fn new<I, S>(states: I) -> Self
    where
        I: IntoIterator<Item = (S, StateSet)>,
        S: Into<String>,
    {
        Self {
            states: states.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            multiplicity: 1,
            class: None,
        }
    }

    /// Parse one symbol per taxon.
    pub fn from_symbols(alphabet: &Alphabet, taxa: &[&str], symbols: &str) -> Result<Self> {
        let chars: Vec<char> = symbols.chars().collect();
        if chars.len() != taxa.len() {
            return Err(SylvaError::Alignment(format!(
                "{} symbols for {} taxa",
                chars.len(),
                taxa.len()
            )));
        }
        let mut states = BTreeMap::new();
        for (&taxon, &c) in taxa.iter().zip(chars.iter()) {
            states.insert(taxon.to_string(), alphabet.parse(c)?);
        }
        Ok(Self {
            states,
            multiplicity: 1,
            class: None,
        })
    }

    /// Set the multiplicity.
    pub fn with_multiplicity(mut self, multiplicity: usize) -> Self {
        self.multiplicity = multiplicity;
        self
    }

    /// Set the class label.
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    /// States observed for `taxon`.
    pub fn get(&self, taxon: &str) -> Result<StateSet> {
        self.states
            .get(taxon)
            .copied()
            .ok_or_else(|| SylvaError::Alignment(format!("site has no taxon '{}'", taxon)))
    }

    /// Taxon → state set, ordered by taxon name.
    pub fn states(&self) -> &BTreeMap<String, StateSet> {
        &self.states
    }

    /// How many times this column occurs.
    pub fn multiplicity(&self) -> usize {
        self.multiplicity
    }

    /// Class label, [`DEFAULT_CLASS`] when none was given.
    pub fn class(&self) -> &str {
        self.class.as_deref().unwrap_or(DEFAULT_CLASS)
    }

    /// True if both sites observe the same states and share a class.
    pub fn same_pattern(&self, other: &Site) -> bool {
        self.states == other.states && self.class() == other.class()
    }
}

/// Sites over an ordered taxon list.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Alignment {
    taxa: Vec<String>,
    sites: Vec<Site>,
}

impl Alignment {
    /// An empty alignment over `taxa`.
    pub fn new<S: Into<String>>(taxa: impl IntoIterator<Item = S>) -> Result<Self> {
        let taxa: Vec<String> = taxa.into_iter().map(Into::into).collect();
        let mut seen = HashMap::new();
        for (i, t) in taxa.iter().enumerate() {
            if seen.insert(t.as_str(), i).is_some() {
                return Err(SylvaError::Alignment(format!("duplicate taxon '{}'", t)));
            }
        }
        Ok(Self {
            taxa,
            sites: Vec::new(),
        })
    }

    /// Build an alignment from one sequence per taxon.
    pub fn from_sequences(alphabet: &Alphabet, names: &[&str], sequences: &[&str]) -> Result<Self> {
        if names.len() != sequences.len() {
            return Err(SylvaError::Alignment(format!(
                "{} names for {} sequences",
                names.len(),
                sequences.len()
            )));
        }
        let rows: Vec<Vec<char>> = sequences.iter().map(|s| s.chars().collect()).collect();
        let len = rows.first().map_or(0, |r| r.len());
        if let Some((i, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != len) {
            return Err(SylvaError::Alignment(format!(
                "sequence '{}' has length {}, expected {}",
                names[i],
                r.len(),
                len
            )));
        }

        let mut alignment = Self::new(names.iter().copied())?;
        for col in 0..len {
            let mut states = BTreeMap::new();
            for (name, row) in names.iter().zip(rows.iter()) {
                states.insert(name.to_string(), alphabet.parse(row[col])?);
            }
            alignment.sites.push(Site {
                states,
                multiplicity: 1,
                class: None,
            });
        }
        Ok(alignment)
    }

    /// Append a site; it must cover exactly this alignment's taxa.
    pub fn push(&mut self, site: Site) -> Result<()> {
        if site.states.len() != self.taxa.len()
            || self.taxa.iter().any(|t| !site.states.contains_key(t))
        {
            return Err(SylvaError::Alignment(format!(
                "site taxa {:?} do not match alignment taxa {:?}",
                site.states.keys().collect::<Vec<_>>(),
                self.taxa
            )));
        }
        self.sites.push(site);
        Ok(())
    }

    /// Taxon names in order.
    pub fn taxa(&self) -> &[String] {
        &self.taxa
    }

    /// Sites in order.
    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// Number of site entries (not weighted by multiplicity).
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// True if there are no sites.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Sum of site multiplicities.
    pub fn total_weight(&self) -> usize {
        self.sites.iter().map(|s| s.multiplicity).sum()
    }

    /// Distinct class labels in first-occurrence order.
    pub fn classes(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for site in &self.sites {
            if !out.contains(&site.class()) {
                out.push(site.class());
            }
        }
        out
    }

    /// Merge identical (pattern, class) sites, summing multiplicities.
    ///
    /// Unique sites keep the order of their first occurrence. The returned
    /// map gives, for every original site, the index of its unique site.
    pub fn compress(&self) -> (Alignment, Vec<usize>) {
        let mut index: HashMap<(&BTreeMap<String, StateSet>, &str), usize> = HashMap::new();
        let mut unique: Vec<Site> = Vec::new();
        let mut map = Vec::with_capacity(self.sites.len());
        for site in &self.sites {
            let key = (&site.states, site.class());
            let u = *index.entry(key).or_insert_with(|| {
                unique.push(Site {
                    multiplicity: 0,
                    ..site.clone()
                });
                unique.len() - 1
            });
            unique[u].multiplicity += site.multiplicity;
            map.push(u);
        }
        let compressed = Alignment {
            taxa: self.taxa.clone(),
            sites: unique,
        };
        (compressed, map)
    }

    /// Sequence of `taxon` rendered through `alphabet`; sets without a symbol show as `?`.
    pub fn sequence(&self, alphabet: &Alphabet, taxon: &str) -> Result<String> {
        self.sites
            .iter()
            .map(|s| s.get(taxon).map(|set| alphabet.symbol_for(set).unwrap_or('?')))
            .collect()
    }
}

impl Summarizable for Alignment {
    fn summary(&self) -> String {
        format!(
            "Alignment: {} taxa, {} sites ({} weighted), {} class(es)",
            self.taxa.len(),
            self.sites.len(),
            self.total_weight(),
            self.classes().len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dna_alignment() -> Alignment {
        Alignment::from_sequences(
            &Alphabet::dna(),
            &["a", "b", "c"],
            &["ACGTA", "ACGAA", "ACN-A"],
        )
        .unwrap()
    }

    #[test]
    fn from_sequences_parses_columns() {
        let aln = dna_alignment();
        assert_eq!(aln.len(), 5);
        assert_eq!(aln.taxa(), &["a", "b", "c"]);
        assert_eq!(aln.sites()[2].get("c").unwrap(), StateSet::full(4));
        assert_eq!(aln.sites()[3].get("b").unwrap(), StateSet::single(0));
        assert!(aln.sites()[0].get("z").is_err());
    }

    #[test]
    fn ragged_sequences_rejected() {
        let err = Alignment::from_sequences(&Alphabet::dna(), &["a", "b"], &["AC", "A"]);
        assert!(matches!(err, Err(SylvaError::Alignment(_))));
    }

    #[test]
    fn compress_merges_duplicates_in_order() {
        let aln = dna_alignment();
        let (unique, map) = aln.compress();
        // columns 0 and 4 are both AAA
        assert_eq!(unique.len(), 4);
        assert_eq!(map, vec![0, 1, 2, 3, 0]);
        assert_eq!(unique.sites()[0].multiplicity(), 2);
        assert_eq!(unique.total_weight(), aln.total_weight());
    }

    #[test]
    fn compress_respects_classes() {
        let alphabet = Alphabet::dna();
        let taxa = ["x", "y"];
        let mut aln = Alignment::new(taxa).unwrap();
        aln.push(Site::from_symbols(&alphabet, &taxa, "AC").unwrap()).unwrap();
        aln.push(Site::from_symbols(&alphabet, &taxa, "AC").unwrap().with_class("fast"))
            .unwrap();
        aln.push(Site::from_symbols(&alphabet, &taxa, "AC").unwrap().with_multiplicity(3))
            .unwrap();
        let (unique, map) = aln.compress();
        assert_eq!(unique.len(), 2);
        assert_eq!(map, vec![0, 1, 0]);
        assert_eq!(unique.sites()[0].multiplicity(), 4);
        assert_eq!(aln.classes(), vec![DEFAULT_CLASS, "fast"]);
    }

    #[test]
    fn push_checks_taxa() {
        let mut aln = Alignment::new(["x", "y"]).unwrap();
        let bad = Site::new([("x", StateSet::single(0))]);
        assert!(aln.push(bad).is_err());
        assert!(Alignment::new(["x", "x"]).is_err());
    }

    #[test]
    fn sequence_roundtrip() {
        let aln = dna_alignment();
        let alphabet = Alphabet::dna();
        assert_eq!(aln.sequence(&alphabet, "a").unwrap(), "ACGTA");
        assert_eq!(aln.sequence(&alphabet, "c").unwrap(), "AC--A");
    }

    #[test]
    fn summary_format() {
        assert_eq!(
            dna_alignment().summary(),
            "Alignment: 3 taxa, 5 sites (5 weighted), 1 class(es)"
        );
    }
}
