use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};

use crate::config::PipelineConfig;
use crate::error::RecError;
use crate::ids::ExternalId;
use crate::interactions::RawInteraction;
use crate::pipeline::{Pipeline, PipelineOutput};
use crate::ranker::{RankerModel, RankingService};
use crate::serialization::{load_model, save_model};

impl<'py> FromPyObject<'py> for ExternalId {
    fn extract_bound(ob: &Bound<'py, PyAny>) -> PyResult<Self> {
        if let Ok(v) = ob.extract::<i64>() {
            return Ok(ExternalId::Int(v));
        }
        Ok(ExternalId::Str(ob.extract::<String>()?))
    }
}

fn append_id(list: &Bound<'_, PyList>, id: &ExternalId) -> PyResult<()> {
    match id {
        ExternalId::Int(v) => list.append(*v),
        ExternalId::Str(s) => list.append(s.as_str()),
    }
}

#[pyclass(module = "rankfunnel", name = "Pipeline")]
pub struct PyPipeline {
    pipeline: Pipeline,
    output: Option<PipelineOutput>,
    service: Option<RankingService>,
}

impl PyPipeline {
    fn fitted(&self) -> PyResult<&PipelineOutput> {
        self.output
            .as_ref()
            .ok_or_else(|| PyRuntimeError::new_err("pipeline is not fitted, call `fit` first"))
    }
}

#[pymethods]
impl PyPipeline {
    /// `config` is a JSON object; missing fields take their defaults.
    #[new]
    #[pyo3(signature = (config=None))]
    fn new(config: Option<&str>) -> PyResult<Self> {
        let config = match config {
            Some(json) => PipelineConfig::from_json(json)?,
            None => PipelineConfig::default(),
        };
        Ok(Self {
            pipeline: Pipeline::new(config)?,
            output: None,
            service: None,
        })
    }

    #[pyo3(signature = (user_ids, item_ids, timestamps=None, weights=None))]
    fn fit(
        &mut self,
        py: Python<'_>,
        user_ids: Vec<ExternalId>,
        item_ids: Vec<ExternalId>,
        timestamps: Option<Vec<i64>>,
        weights: Option<Vec<f32>>,
    ) -> PyResult<()> {
        let n = user_ids.len();
        let columns_match = item_ids.len() == n
            && timestamps.as_ref().map_or(true, |t| t.len() == n)
            && weights.as_ref().map_or(true, |w| w.len() == n);
        if !columns_match {
            return Err(pyo3::exceptions::PyValueError::new_err(
                "`user_ids`, `item_ids`, `timestamps` and `weights` must have equal length",
            ));
        }

        let raw: Vec<RawInteraction> = user_ids
            .into_iter()
            .zip(item_ids)
            .enumerate()
            .map(|(i, (user, item))| {
                let ts = timestamps.as_ref().map(|t| t[i]);
                let weight = weights.as_ref().map_or(1.0, |w| w[i]);
                RawInteraction::new(user, item, ts, weight)
            })
            .collect();

        let output = py.allow_threads(|| self.pipeline.run(&raw))?;
        self.service = Some(output.ranking_service());
        self.output = Some(output);
        Ok(())
    }

    #[getter]
    fn n_users(&self) -> PyResult<usize> {
        Ok(self.fitted()?.metadata.n_users)
    }

    #[getter]
    fn n_items(&self) -> PyResult<usize> {
        Ok(self.fitted()?.metadata.n_items)
    }

    #[getter]
    fn validation_auc(&self) -> PyResult<f64> {
        Ok(self.fitted()?.validation_auc)
    }

    /// Ranked external item ids, empty for unknown users.
    fn recommend<'py>(
        &self,
        py: Python<'py>,
        user_id: ExternalId,
        k: usize,
    ) -> PyResult<Bound<'py, PyList>> {
        let service = self
            .service
            .as_ref()
            .ok_or_else(|| PyRuntimeError::new_err("pipeline is not fitted, call `fit` first"))?;
        let list = PyList::empty(py);
        for id in service.recommend(&user_id, k) {
            append_id(&list, &id)?;
        }
        Ok(list)
    }

    /// `{recommender: {"recall": .., "ndcg": .., "coverage": ..}}`
    fn metrics<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let output = self.fitted()?;
        let dict = PyDict::new(py);
        for (name, report) in [
            ("popularity", &output.popularity_report),
            ("svd", &output.svd_report),
            ("ranker", &output.ranker_report),
        ] {
            let m = PyDict::new(py);
            m.set_item("recall", report.metrics.recall)?;
            m.set_item("ndcg", report.metrics.ndcg)?;
            m.set_item("coverage", report.metrics.coverage)?;
            dict.set_item(name, m)?;
        }
        Ok(dict)
    }
}

#[pyfunction]
#[pyo3(name = "save_ranker")]
pub fn save(pipeline: &PyPipeline, path: &str, model_name: &str) -> PyResult<()> {
    save_model(&pipeline.fitted()?.model, path, model_name, "RankerModel")?;
    Ok(())
}

/// Load a saved ranker and return it as a JSON document.
#[pyfunction]
#[pyo3(name = "load_ranker")]
pub fn load(path: &str, model_name: &str) -> PyResult<String> {
    let model: RankerModel = load_model(path, model_name, "RankerModel")?;
    Ok(serde_json::to_string(&model).map_err(RecError::from)?)
}
