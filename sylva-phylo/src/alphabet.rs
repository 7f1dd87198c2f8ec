//! Character-state alphabets.
//!
//! An [`Alphabet`] fixes the order of the states a model works over and maps
//! observed symbols, including ambiguity codes and missing-data marks, to
//! the [`StateSet`] they stand for.

use std::collections::BTreeMap;
use std::fmt;

use sylva_core::{Result, SylvaError};

/// Largest number of states a [`StateSet`] can hold.
pub const MAX_STATES: usize = 64;

/// A set of state indices, stored as a bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StateSet(u64);

impl StateSet {
    /// The empty set.
    pub const EMPTY: StateSet = StateSet(0);

    /// A set holding only `state`.
    pub fn single(state: usize) -> Self {
        debug_assert!(state < MAX_STATES);
        StateSet(1u64 << state)
    }

    /// The set of all `n` states.
    pub fn full(n: usize) -> Self {
        if n >= MAX_STATES {
            StateSet(u64::MAX)
        } else {
            StateSet((1u64 << n) - 1)
        }
    }

    /// Build a set from state indices.
    pub fn from_states<I: IntoIterator<Item = usize>>(states: I) -> Self {
        states.into_iter().fold(StateSet::EMPTY, |s, i| s.with(i))
    }

    /// This set plus `state`.
    pub fn with(self, state: usize) -> Self {
        StateSet(self.0 | StateSet::single(state).0)
    }

    /// True if `state` is a member.
    pub fn contains(&self, state: usize) -> bool {
        state < MAX_STATES && self.0 & (1u64 << state) != 0
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// True if there are no members.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let bits = self.0;
        (0..MAX_STATES).filter(move |&i| bits & (1u64 << i) != 0)
    }

    /// Set intersection.
    pub fn intersect(self, other: StateSet) -> StateSet {
        StateSet(self.0 & other.0)
    }

    /// Set union.
    pub fn union(self, other: StateSet) -> StateSet {
        StateSet(self.0 | other.0)
    }
}

impl fmt::Debug for StateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// An ordered list of states plus the symbols that may be observed for them.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Alphabet {
    states: Vec<char>,
    codes: BTreeMap<char, StateSet>,
    case_insensitive: bool,
}

const IUPAC_DNA: [(char, &str); 11] = [
    ('R', "AG"),
    ('Y', "CT"),
    ('S', "CG"),
    ('W', "AT"),
    ('K', "GT"),
    ('M', "AC"),
    ('B', "CGT"),
    ('D', "AGT"),
    ('H', "ACT"),
    ('V', "ACG"),
    ('U', "T"),
];

const AMINO_ACIDS: &str = "ARNDCQEGHILKMFPSTWYV";

impl Alphabet {
    /// An alphabet over `symbols`, in the given order.
    ///
    /// Symbols are matched exactly. Duplicate symbols or more than
    /// [`MAX_STATES`] states are rejected.
    pub fn new(symbols: &[char]) -> Result<Self> {
        if symbols.is_empty() {
            return Err(SylvaError::InvalidInput("alphabet has no states".into()));
        }
        if symbols.len() > MAX_STATES {
            return Err(SylvaError::InvalidInput(format!(
                "alphabet has {} states, at most {} are supported",
                symbols.len(),
                MAX_STATES
            )));
        }
        let mut codes = BTreeMap::new();
        for (i, &c) in symbols.iter().enumerate() {
            if codes.insert(c, StateSet::single(i)).is_some() {
                return Err(SylvaError::InvalidInput(format!(
                    "duplicate alphabet symbol '{}'",
                    c
                )));
            }
        }
        Ok(Self {
            states: symbols.to_vec(),
            codes,
            case_insensitive: false,
        })
    }

    /// Nucleotides `ACGT` with IUPAC ambiguity codes; `N`, `-` and `?` are missing data.
    pub fn dna() -> Self {
        let mut a = Self::builtin("ACGT");
        for (code, members) in IUPAC_DNA {
            let set = StateSet::from_states(members.chars().filter_map(|m| a.state_index(m)));
            a.codes.insert(code, set);
        }
        a.with_missing_symbols(&['N', '-', '?'])
    }

    /// The twenty amino acids; `B`, `Z` and `J` are ambiguity codes, `X`, `-` and `?` missing.
    pub fn protein() -> Self {
        let mut a = Self::builtin(AMINO_ACIDS);
        for (code, members) in [('B', "DN"), ('Z', "EQ"), ('J', "IL")] {
            let set = StateSet::from_states(members.chars().filter_map(|m| a.state_index(m)));
            a.codes.insert(code, set);
        }
        a.with_missing_symbols(&['X', '-', '?'])
    }

    /// Two states `0` and `1`; `-` and `?` are missing data.
    pub fn binary() -> Self {
        Self::builtin("01").with_missing_symbols(&['-', '?'])
    }

    fn builtin(symbols: &str) -> Self {
        let states: Vec<char> = symbols.chars().collect();
        let codes = states
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, StateSet::single(i)))
            .collect();
        Self {
            states,
            codes,
            case_insensitive: true,
        }
    }

    /// Register an ambiguity code standing for `members`.
    pub fn with_ambiguity(mut self, code: char, members: &[char]) -> Result<Self> {
        if self.state_index(code).is_some() {
            return Err(SylvaError::InvalidInput(format!(
                "'{}' is already a state symbol",
                code
            )));
        }
        let mut set = StateSet::EMPTY;
        for &m in members {
            let i = self.state_index(m).ok_or_else(|| {
                SylvaError::InvalidInput(format!(
                    "ambiguity '{}' names unknown state '{}'",
                    code, m
                ))
            })?;
            set = set.with(i);
        }
        self.codes.insert(code, set);
        Ok(self)
    }

    /// Register symbols that stand for any state.
    pub fn with_missing_symbols(mut self, symbols: &[char]) -> Self {
        let full = self.full();
        for &s in symbols {
            self.codes.entry(s).or_insert(full);
        }
        self
    }

    /// Number of states.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True if the alphabet has no states. Never the case for a constructed alphabet.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// State symbols in index order.
    pub fn symbols(&self) -> &[char] {
        &self.states
    }

    /// Symbol of state `index`.
    pub fn symbol(&self, index: usize) -> Option<char> {
        self.states.get(index).copied()
    }

    /// Index of a state symbol; ambiguity codes are not states.
    pub fn state_index(&self, symbol: char) -> Option<usize> {
        let symbol = self.normalize(symbol);
        self.states.iter().position(|&c| c == symbol)
    }

    /// Set of all states.
    pub fn full(&self) -> StateSet {
        StateSet::full(self.states.len())
    }

    /// The states an observed symbol stands for.
    pub fn parse(&self, symbol: char) -> Result<StateSet> {
        self.codes
            .get(&self.normalize(symbol))
            .copied()
            .ok_or_else(|| SylvaError::Alignment(format!("unknown symbol '{}'", symbol)))
    }

    /// Symbol that stands for exactly `set`, preferring state symbols.
    pub fn symbol_for(&self, set: StateSet) -> Option<char> {
        if set.len() == 1 {
            return set.iter().next().and_then(|i| self.symbol(i));
        }
        self.codes
            .iter()
            .find(|(_, &s)| s == set)
            .map(|(&c, _)| c)
    }

    fn normalize(&self, symbol: char) -> char {
        if self.case_insensitive {
            symbol.to_ascii_uppercase()
        } else {
            symbol
        }
    }
}
