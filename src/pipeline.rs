use std::time::Instant;

use rayon::ThreadPool;

use crate::candidates::CandidateSet;
use crate::config::PipelineConfig;
use crate::consumed::build_consumed;
use crate::error::Result;
use crate::evaluation::{evaluate, Metrics};
use crate::factorization::SvdRanker;
use crate::features::{FeatureAssembler, FeatureTable};
use crate::ids::{build_mappings, IdMap};
use crate::interactions::{dedup_last, index_interactions, Interaction, RawInteraction};
use crate::io::Metadata;
use crate::item_item::item_item_candidates;
use crate::neighborhood::neighborhood_candidates;
use crate::popularity::PopularityRanker;
use crate::ranker::{rank_features, train_with_validation, Ranker, RankerModel, RankingService};
use crate::recommendations::Recommendations;
use crate::sparse::CsrMatrix;
use crate::split::{leave_last_one_out, Split};
use crate::utils::create_thread_pool;

#[derive(Clone, Debug)]
pub struct RecommenderReport {
    pub recommendations: Recommendations,
    pub metrics: Metrics,
}

/// Every artifact of one run. All of them reference the same id mappings.
pub struct PipelineOutput {
    pub users: IdMap,
    pub items: IdMap,
    pub interactions: Vec<Interaction>,
    pub split: Split,
    pub train_matrix: CsrMatrix<u32, f32>,
    pub popularity: PopularityRanker,
    pub item_item: CandidateSet,
    pub neighborhood: CandidateSet,
    pub features: FeatureTable,
    pub model: RankerModel,
    pub validation_auc: f64,
    pub popularity_report: RecommenderReport,
    pub svd_report: RecommenderReport,
    pub ranker_report: RecommenderReport,
    pub metadata: Metadata,
}

impl PipelineOutput {
    /// Query handle over the trained ranker.
    pub fn ranking_service(&self) -> RankingService {
        RankingService::new(
            &self.model,
            &self.features,
            self.users.clone(),
            self.items.clone(),
        )
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    pool: ThreadPool,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let pool = create_thread_pool(config.num_threads)?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, raw: &[RawInteraction]) -> Result<PipelineOutput> {
        self.pool.install(|| self.run_stages(raw))
    }

    fn run_stages(&self, raw: &[RawInteraction]) -> Result<PipelineOutput> {
        let start = Instant::now();
        let config = &self.config;

        let raw = dedup_last(raw);
        let (users, items) = build_mappings(&raw)?;
        let (n_users, n_items) = (users.len(), items.len());
        let k = config.top_k.min(n_items);
        if k < config.top_k {
            tracing::warn!("top_k {} clamped to catalog size {n_items}", config.top_k);
        }
        let interactions = index_interactions(&raw, &users, &items);

        let split = leave_last_one_out(&interactions, n_users);
        let train_matrix = CsrMatrix::from_interactions(&split.train, n_users, n_items)?;
        let consumed = build_consumed(&split.train, n_users);
        let n_cold = consumed.iter().filter(|seen| seen.is_empty()).count();
        if n_cold > 0 {
            tracing::warn!("{n_cold} users have no training interactions");
        }

        let popularity = PopularityRanker::fit(&split.train, n_items);
        let popularity_recs = popularity.recommend(&consumed, k);

        let svd = SvdRanker::fit(&train_matrix, config.factors, config.iterations, config.seed)?;
        let svd_recs = svd.recommend(&consumed, k);

        // candidate generators read the full interaction table
        let item_item = item_item_candidates(&interactions, n_users, n_items, config.candidate_top_k)?;
        let neighborhood = neighborhood_candidates(
            &interactions,
            n_users,
            n_items,
            config.n_neighbors,
            config.candidate_top_k,
        );

        let features = FeatureAssembler::from_config(config).assemble(
            &split.train,
            &split.held_out,
            &popularity,
            &neighborhood,
            &item_item,
        );
        let trainer = Ranker::from_config(&config.ranker);
        let (model, validation_auc) = train_with_validation(
            &trainer,
            &features,
            config.ranker.validation_fraction,
            config.seed,
        )?;
        let ranker_recs = rank_features(&model, &features, n_users, k);

        let report = |recommendations: Recommendations| RecommenderReport {
            metrics: evaluate(&recommendations, &split.held_out, n_items, k),
            recommendations,
        };
        let popularity_report = report(popularity_recs);
        let svd_report = report(svd_recs);
        let ranker_report = report(ranker_recs);

        for (name, r) in [
            ("popularity", &popularity_report),
            ("svd", &svd_report),
            ("ranker", &ranker_report),
        ] {
            tracing::info!(
                recommender = name,
                recall = r.metrics.recall,
                ndcg = r.metrics.ndcg,
                coverage = r.metrics.coverage,
                "evaluation @{k}"
            );
        }
        tracing::info!("pipeline finished in {:.4?}", start.elapsed());

        Ok(PipelineOutput {
            metadata: Metadata { n_users, n_items, k },
            users,
            items,
            interactions,
            split,
            train_matrix,
            popularity,
            item_item,
            neighborhood,
            features,
            model,
            validation_auc,
            popularity_report,
            svd_report,
            ranker_report,
        })
    }
}
