//! Aggregation-plan model
//!
//! Canonical descriptor produced by the SQL compiler and consumed by an
//! execution layer. All types are deterministically serializable so plans
//! can be cached and fingerprinted.

use bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How the execution layer should run a compiled plan against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMethod {
    Aggregate,
}

impl ExecMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecMethod::Aggregate => "aggregate",
        }
    }
}

/// One step of an aggregation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage")]
pub enum Stage {
    Match { predicate: Document },
    Group { id: Bson, fields: Document },
    Project { exclusions: Vec<String> },
    Sort { keys: Document },
    Skip { count: i64 },
    Limit { count: i64 },
}

impl Stage {
    /// Render the wire form the document store executes.
    pub fn to_document(&self) -> Document {
        match self {
            Stage::Match { predicate } => doc! { "$match": predicate.clone() },
            Stage::Group { id, fields } => {
                // `_id` must come first; accumulators keep select-list order.
                let mut group = doc! { "_id": id.clone() };
                group.extend(fields.clone());
                doc! { "$group": group }
            }
            Stage::Project { exclusions } => {
                let mut spec = Document::new();
                for field in exclusions {
                    spec.insert(field.clone(), 0);
                }
                doc! { "$project": spec }
            }
            Stage::Sort { keys } => doc! { "$sort": keys.clone() },
            Stage::Skip { count } => doc! { "$skip": *count },
            Stage::Limit { count } => doc! { "$limit": *count },
        }
    }
}

/// Compiled form of one SQL statement: the target collection, the execution
/// method (`None` for statements that need no pipeline, e.g. CREATE), and
/// the ordered pipeline stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub collection: String,
    pub method: Option<ExecMethod>,
    pub stages: Vec<Stage>,
}

impl CompiledQuery {
    /// Render the ordered pipeline as the store expects it.
    pub fn pipeline(&self) -> Vec<Document> {
        self.stages.iter().map(Stage::to_document).collect()
    }

    /// Calculate fingerprint (SHA-256) for deterministic plan caching.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("plan should always serialize");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_stage_renders_id_before_accumulators() {
        let stage = Stage::Group {
            id: Bson::Document(doc! { "city": "$city" }),
            fields: doc! { "city": { "$first": "$city" }, "total": { "$sum": 1 } },
        };

        assert_eq!(
            stage.to_document(),
            doc! { "$group": {
                "_id": { "city": "$city" },
                "city": { "$first": "$city" },
                "total": { "$sum": 1 },
            } }
        );
    }

    #[test]
    fn whole_input_group_uses_constant_id() {
        let stage = Stage::Group {
            id: Bson::Int32(1),
            fields: doc! { "cnt": { "$sum": 1 } },
        };

        assert_eq!(
            stage.to_document(),
            doc! { "$group": { "_id": 1, "cnt": { "$sum": 1 } } }
        );
    }

    #[test]
    fn project_stage_maps_exclusions_to_zero() {
        let stage = Stage::Project {
            exclusions: vec!["_id".to_string()],
        };

        assert_eq!(stage.to_document(), doc! { "$project": { "_id": 0 } });
    }

    #[test]
    fn skip_and_limit_render_plain_counts() {
        assert_eq!(Stage::Skip { count: 2 }.to_document(), doc! { "$skip": 2_i64 });
        assert_eq!(Stage::Limit { count: 100 }.to_document(), doc! { "$limit": 100_i64 });
    }

    #[test]
    fn pipeline_preserves_stage_order() {
        let plan = CompiledQuery {
            collection: "donors".to_string(),
            method: Some(ExecMethod::Aggregate),
            stages: vec![
                Stage::Skip { count: 2 },
                Stage::Limit { count: 10 },
            ],
        };

        assert_eq!(
            plan.pipeline(),
            vec![doc! { "$skip": 2_i64 }, doc! { "$limit": 10_i64 }]
        );
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let plan = CompiledQuery {
            collection: "donors".to_string(),
            method: Some(ExecMethod::Aggregate),
            stages: vec![Stage::Match {
                predicate: doc! { "city": { "$eq": "SF" } },
            }],
        };

        assert_eq!(plan.fingerprint(), plan.clone().fingerprint());
    }
}
