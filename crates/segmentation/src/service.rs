//! Segment service: named rule trees per owner, and segment membership
//! computed over an owner's records.
//!
//! Every public operation converts failures into the response envelopes of
//! `crm_core::types`; nothing is returned as `Err` to the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use crm_core::{ApiResponse, FilterResult, SegmentError, SegmentResult, SegmentationConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::FieldCatalog;
use crate::evaluator::{AnomalySink, Evaluator, TracingSink};
use crate::query::{compile, SelectQuery};
use crate::records::Record;
use crate::rules::{RuleTree, TreeLimits};
use crate::store::{RecordStore, SegmentStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    pub owner_id: String,
    pub rules: Option<RuleTree>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    pub fn new(name: impl Into<String>, owner_id: impl Into<String>, rules: Option<RuleTree>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            owner_id: owner_id.into(),
            rules,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Creation request as submitted by the segment form. `rules` stays raw JSON
/// until the service has validated it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSegment {
    pub name: String,
    #[serde(alias = "userId")]
    pub owner_id: String,
    #[serde(default)]
    pub rules: Option<Value>,
}

pub struct SegmentService {
    segments: Arc<dyn SegmentStore>,
    records: Arc<dyn RecordStore>,
    evaluator: Evaluator,
    catalog: Arc<FieldCatalog>,
    limits: TreeLimits,
    default_table: String,
}

impl SegmentService {
    pub fn new(segments: Arc<dyn SegmentStore>, records: Arc<dyn RecordStore>) -> Self {
        Self::from_config(
            &SegmentationConfig::default(),
            segments,
            records,
            Arc::new(FieldCatalog::customers()),
            Arc::new(TracingSink),
        )
    }

    pub fn from_config(
        config: &SegmentationConfig,
        segments: Arc<dyn SegmentStore>,
        records: Arc<dyn RecordStore>,
        catalog: Arc<FieldCatalog>,
        sink: Arc<dyn AnomalySink>,
    ) -> Self {
        Self {
            segments,
            records,
            evaluator: Evaluator::from_config(config, sink),
            catalog,
            limits: TreeLimits::from(config),
            default_table: config.default_table.clone(),
        }
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    pub fn create_segment(&self, request: NewSegment) -> ApiResponse<Segment> {
        let owner_id = request.owner_id.clone();
        match self.try_create(request) {
            Ok(segment) => {
                metrics::counter!("segmentation.segments_created").increment(1);
                info!(segment_id = %segment.id, owner_id = %segment.owner_id, "segment created");
                ApiResponse::ok("Segment created successfully", segment)
            }
            Err(err) => {
                warn!(owner_id = %owner_id, error = %err, "segment creation rejected");
                ApiResponse::failure(err.public_message())
            }
        }
    }

    fn try_create(&self, request: NewSegment) -> SegmentResult<Segment> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(SegmentError::Validation("Segment name is required".into()));
        }
        if request.owner_id.trim().is_empty() {
            return Err(SegmentError::Validation("Owner is required".into()));
        }
        let rules = self.parse_rules(request.rules)?;
        let segment = Segment::new(name, request.owner_id, Some(rules));
        self.segments
            .save(segment.clone())
            .map_err(|e| SegmentError::Internal(e.context("saving segment")))?;
        Ok(segment)
    }

    fn parse_rules(&self, rules: Option<Value>) -> SegmentResult<RuleTree> {
        let raw = match rules {
            None | Some(Value::Null) => {
                return Err(SegmentError::Validation("there are no rules".into()))
            }
            Some(raw) => raw,
        };
        let tree = RuleTree::from_value(raw)?;
        tree.validate(&self.limits)?;
        for warning in tree.lint(&self.catalog) {
            warn!(
                condition_id = %warning.condition_id,
                "{}", warning.message
            );
        }
        Ok(tree)
    }

    /// Segments owned by `owner_id`; empty when the lookup fails.
    pub fn list_segments(&self, owner_id: &str) -> Vec<Segment> {
        self.segments.list_by_owner(owner_id).unwrap_or_else(|e| {
            warn!(owner_id, error = %e, "failed to list segments");
            Vec::new()
        })
    }

    pub fn get_segment(&self, segment_id: &str, owner_id: &str) -> ApiResponse<Segment> {
        match self.owned_segment(segment_id, owner_id) {
            Ok(segment) => ApiResponse::ok("Segment found", segment),
            Err(err) => ApiResponse::failure(err.public_message()),
        }
    }

    /// Replace the whole rule tree. Concurrent editors overwrite each other.
    pub fn replace_rules(
        &self,
        segment_id: &str,
        owner_id: &str,
        rules: Option<Value>,
    ) -> ApiResponse<Segment> {
        let result = self.owned_segment(segment_id, owner_id).and_then(|mut segment| {
            segment.rules = Some(self.parse_rules(rules)?);
            segment.updated_at = Utc::now();
            self.segments
                .save(segment.clone())
                .map_err(|e| SegmentError::Internal(e.context("saving segment")))?;
            Ok(segment)
        });
        match result {
            Ok(segment) => {
                info!(segment_id = %segment.id, owner_id, "segment rules replaced");
                ApiResponse::ok("Segment updated successfully", segment)
            }
            Err(err) => {
                warn!(segment_id, owner_id, error = %err, "segment update rejected");
                ApiResponse::failure(err.public_message())
            }
        }
    }

    pub fn delete_segment(&self, segment_id: &str, owner_id: &str) -> ApiResponse<()> {
        let result = self.owned_segment(segment_id, owner_id).and_then(|segment| {
            self.segments
                .delete(&segment.id)
                .map_err(|e| SegmentError::Internal(e.context("deleting segment")))
        });
        match result {
            Ok(_) => ApiResponse::ok("Segment deleted successfully", ()),
            Err(err) => ApiResponse::failure(err.public_message()),
        }
    }

    /// Records of `owner_id` that belong to the segment. Fails closed (no
    /// records, error set) when the segment is missing or owned by someone
    /// else.
    pub fn evaluate_segment(&self, segment_id: &str, owner_id: &str) -> FilterResult<Record> {
        let result = self.owned_segment(segment_id, owner_id).and_then(|segment| {
            let rules = segment
                .rules
                .ok_or_else(|| SegmentError::Validation("Segment has no rules".into()))?;
            let records = self.load_records(owner_id)?;
            Ok(self.run(&rules, records))
        });
        self.finish(result, segment_id, owner_id)
    }

    /// Parameterized statement selecting the segment's members from the
    /// configured table, for hosts that evaluate segments in the database.
    pub fn segment_query(&self, segment_id: &str, owner_id: &str) -> ApiResponse<SelectQuery> {
        let result = self.owned_segment(segment_id, owner_id).and_then(|segment| {
            let rules = segment
                .rules
                .ok_or_else(|| SegmentError::Validation("Segment has no rules".into()))?;
            compile(&rules, self.evaluator.empty_group_policy()).to_sql(&self.catalog)
        });
        match result {
            Ok(fragment) => {
                ApiResponse::ok("Segment query rendered", fragment.into_select(&self.default_table))
            }
            Err(err) => {
                warn!(segment_id, owner_id, error = %err, "segment query rejected");
                ApiResponse::failure(err.public_message())
            }
        }
    }

    /// Evaluate an unsaved tree against the owner's records.
    pub fn preview(&self, rules: &RuleTree, owner_id: &str) -> FilterResult<Record> {
        let result = rules
            .validate(&self.limits)
            .and_then(|()| self.load_records(owner_id))
            .map(|records| self.run(rules, records));
        self.finish(result, "preview", owner_id)
    }

    fn finish(
        &self,
        result: SegmentResult<FilterResult<Record>>,
        segment_id: &str,
        owner_id: &str,
    ) -> FilterResult<Record> {
        match result {
            Ok(filtered) => {
                info!(
                    segment_id,
                    owner_id,
                    matched = filtered.total,
                    total = filtered.original_total.unwrap_or_default(),
                    "segment evaluated"
                );
                filtered
            }
            Err(err) => {
                warn!(segment_id, owner_id, error = %err, "segment evaluation failed");
                FilterResult::failed(err.public_message())
            }
        }
    }

    fn run(&self, rules: &RuleTree, records: Vec<Record>) -> FilterResult<Record> {
        let original_total = records.len();
        let matched: Vec<Record> = records
            .into_iter()
            .filter(|r| self.evaluator.evaluate(rules, r))
            .collect();
        metrics::counter!("segmentation.evaluations").increment(1);
        metrics::counter!("segmentation.records_matched").increment(matched.len() as u64);
        FilterResult::matched(matched, original_total)
    }

    fn load_records(&self, owner_id: &str) -> SegmentResult<Vec<Record>> {
        self.records.records_for(owner_id).map_err(|e| {
            warn!(owner_id, error = %e, "record lookup failed");
            SegmentError::Lookup("Records could not be loaded".into())
        })
    }

    fn owned_segment(&self, segment_id: &str, owner_id: &str) -> SegmentResult<Segment> {
        let not_found = || SegmentError::Lookup("Segment not found".into());
        let id = Uuid::parse_str(segment_id).map_err(|_| not_found())?;
        let segment = self
            .segments
            .get(&id)
            .map_err(|e| {
                warn!(segment_id, error = %e, "segment lookup failed");
                SegmentError::Lookup("Segment lookup failed".into())
            })?
            .ok_or_else(not_found)?;
        if segment.owner_id != owner_id {
            warn!(segment_id, owner_id, "segment requested by non-owner");
            return Err(not_found());
        }
        Ok(segment)
    }
}
