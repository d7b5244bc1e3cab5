//! Offline recommendation pipeline over implicit feedback.
//!
//! Raw `(user, item, timestamp)` interactions are mapped to dense indices,
//! split leave-last-one-out and turned into a sparse user-item matrix.
//! On top of it sit two baselines (popularity and truncated SVD), two
//! candidate generators (item-item cosine and user-user Jaccard), a feature
//! assembler, a trainable ranker and the offline evaluator.

pub mod boosting;
pub mod candidates;
pub mod config;
pub mod consumed;
pub mod error;
pub mod evaluation;
pub mod factorization;
pub mod features;
pub mod ids;
pub mod interactions;
pub mod io;
pub mod item_item;
pub mod neighborhood;
pub mod pipeline;
pub mod popularity;
pub mod ranker;
pub mod recommendations;
pub mod serialization;
pub mod similarities;
pub mod sparse;
pub mod split;
pub mod synthetic;
pub mod utils;

#[cfg(feature = "python")]
mod python;

pub use boosting::{BoostedTrees, GradientBoosting};
pub use candidates::CandidateSet;
pub use config::{PipelineConfig, RankerConfig, RankerKind};
pub use error::{RecError, Result};
pub use evaluation::{coverage, evaluate, ndcg_at_k, recall_at_k, Metrics};
pub use factorization::SvdRanker;
pub use features::{FeatureAssembler, FeatureRow, FeatureTable};
pub use ids::{build_mappings, ExternalId, IdMap};
pub use interactions::{Interaction, RawInteraction};
pub use item_item::item_item_candidates;
pub use neighborhood::neighborhood_candidates;
pub use pipeline::{Pipeline, PipelineOutput, RecommenderReport};
pub use popularity::PopularityRanker;
pub use ranker::{
    LogisticModel, LogisticRegression, Ranker, RankerModel, RankingService, Scorer, TrainableScorer,
};
pub use recommendations::Recommendations;
pub use sparse::CsrMatrix;
pub use split::{leave_last_one_out, HeldOut, Split};

#[cfg(feature = "python")]
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Python bindings. The function name must match the `lib.name` setting in
/// `Cargo.toml`.
#[cfg(feature = "python")]
#[pyo3::pymodule]
#[pyo3(name = "rankfunnel")]
fn rankfunnel(m: &pyo3::Bound<'_, pyo3::types::PyModule>) -> pyo3::PyResult<()> {
    use pyo3::prelude::*;

    m.add_class::<python::PyPipeline>()?;
    m.add_function(wrap_pyfunction!(python::save, m)?)?;
    m.add_function(wrap_pyfunction!(python::load, m)?)?;

    m.add("__version__", VERSION)?;
    Ok(())
}
