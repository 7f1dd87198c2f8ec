//! Tree likelihood, ancestral reconstruction and simulation under
//! continuous-time Markov models.
//!
//! - **Trees** — arena-backed rooted trees with a Newick reader
//! - **Data** — alphabets with ambiguity codes, alignments with site
//!   multiplicities and site classes
//! - **Models** — rate expressions, root-frequency policies, rate mixtures and
//!   discrete-gamma heterogeneity over named [`Parameters`]
//! - **Transition probabilities** — Taylor-series or eigen exponentiation,
//!   frozen in an immutable [`Probabilities`] snapshot
//! - **Likelihood** — Felsenstein pruning generic over the [`Real`](sylva_core::Real)
//!   representation
//! - **Ancestral states** — marginal posteriors and joint reconstruction by
//!   dynamic programming or branch-and-bound
//! - **Simulation** — forward sampling with rejection and recoding
//!
//! # Example
//!
//! ```
//! use sylva_phylo::{
//!     Alignment, Alphabet, Calculator, EngineConfig, EqualRates, Model, Parameters, PhyloTree,
//! };
//!
//! let tree = PhyloTree::from_newick("((a:0.1,b:0.2)x:0.3,c:0.4)r;").unwrap();
//! let dna = Alphabet::dna();
//! let aln = Alignment::from_sequences(&dna, &["a", "b", "c"], &["ACGT", "ACGA", "ACTT"]).unwrap();
//! let model = Model::single(dna, EqualRates::new(4)).unwrap();
//! let calc: Calculator = Calculator::new(model, tree, &aln, EngineConfig::default()).unwrap();
//! let result = calc.calculate(&Parameters::new()).unwrap();
//! assert!(result.log_likelihood < 0.0);
//! assert_eq!(result.site_log_likelihoods.len(), 4);
//! ```

pub mod alignment;
pub mod alphabet;
pub mod config;
pub mod constraints;
pub mod expm;
pub mod joint;
pub mod likelihood;
pub mod marginal;
pub mod model;
pub mod newick;
pub mod parameters;
pub mod probabilities;
pub mod simulation;
pub mod tree;

pub use alignment::{Alignment, Site, DEFAULT_CLASS};
pub use alphabet::{Alphabet, StateSet};
pub use config::{EngineConfig, ExpMethod, GammaMethod, JointStrategy};
pub use constraints::{
    Constrainer, NoConstraints, NodeConstraints, PerSiteConstraints, SiteConstraints,
};
pub use joint::{
    joint_reconstructor, BranchAndBound, DynamicProgramming, JointReconstruction,
    JointReconstructor, SiteAssignment,
};
pub use likelihood::{Calculator, ClassCalculator, LikelihoodResult, SiteLikelihood};
pub use marginal::{MarginalReconstruction, MarginalReconstructor, SiteMarginals};
pub use model::{
    EqualRates, FixedRates, GammaRates, Gtr, Model, ParameterRates, RateCategory,
    RateExpression, RootFrequencies, Scalar,
};
pub use parameters::{Domain, Parameters};
pub use probabilities::{CategoryProbabilities, Probabilities, RootDistribution};
pub use simulation::{Recoding, Simulator};
pub use tree::{Node, NodeId, PhyloTree};
