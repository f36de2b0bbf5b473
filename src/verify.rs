//! Drift check between a plan and a live database

use std::fmt;

use tracing::debug;

use crate::plan::ReconciliationPlan;
use crate::store::{DatabaseHandle, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionStatus {
    pub name: String,
    pub exists: bool,
    /// Declared indexes with no live index of the same name
    pub missing_indexes: Vec<String>,
    /// Declared indexes whose live key pattern or uniqueness differs
    pub mismatched_indexes: Vec<String>,
    pub documents: u64,
    pub planned_documents: usize,
}

impl CollectionStatus {
    pub fn is_clean(&self) -> bool {
        self.exists
            && self.missing_indexes.is_empty()
            && self.mismatched_indexes.is_empty()
            && self.documents == self.planned_documents as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyReport {
    pub collections: Vec<CollectionStatus>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.collections.iter().all(CollectionStatus::is_clean)
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, status) in self.collections.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            if !status.exists {
                write!(f, "{}: missing", status.name)?;
                continue;
            }
            write!(
                f,
                "{}: {} documents (planned {}){}",
                status.name,
                status.documents,
                status.planned_documents,
                if status.is_clean() { "" } else { " DRIFT" }
            )?;
            for name in &status.missing_indexes {
                write!(f, "\n  - missing index {}", name)?;
            }
            for name in &status.mismatched_indexes {
                write!(f, "\n  - index {} differs from the plan", name)?;
            }
        }
        Ok(())
    }
}

/// Compare the live database with `plan` without changing anything
pub async fn verify<H: DatabaseHandle + ?Sized>(
    plan: &ReconciliationPlan,
    db: &H,
) -> Result<VerifyReport, StoreError> {
    let live = db.collection_names().await?;
    let mut report = VerifyReport::default();

    for spec in plan.collections() {
        let name = spec.name();
        let planned_documents = plan.batch(name).map(|b| b.records().len()).unwrap_or(0);
        if !live.iter().any(|n| n == name) {
            report.collections.push(CollectionStatus {
                name: name.to_string(),
                exists: false,
                missing_indexes: spec.indexes().iter().map(|i| i.name()).collect(),
                mismatched_indexes: Vec::new(),
                documents: 0,
                planned_documents,
            });
            continue;
        }

        let indexes = db.indexes(name).await?;
        let mut missing_indexes = Vec::new();
        let mut mismatched_indexes = Vec::new();
        for declared in spec.indexes() {
            let index_name = declared.name();
            match indexes.iter().find(|i| i.name == index_name) {
                None => missing_indexes.push(index_name),
                Some(found) => {
                    if !declared.keys().matches(&found.keys) || found.unique != declared.is_unique() {
                        debug!(collection = name, index = %index_name, live = %found.keys, "index differs");
                        mismatched_indexes.push(index_name);
                    }
                }
            }
        }

        report.collections.push(CollectionStatus {
            name: name.to_string(),
            exists: true,
            missing_indexes,
            mismatched_indexes,
            documents: db.count_documents(name).await?,
            planned_documents,
        });
    }
    Ok(report)
}
