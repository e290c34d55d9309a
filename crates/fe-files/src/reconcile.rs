//! Attachment list reconciliation
//!
//! Turns a submitted ordering plus per-row data into the authoritative,
//! weight-sorted attachment list for one parent. Nothing here touches storage.

use std::collections::{HashMap, HashSet};

use fe_core::config::AttachmentSettings;
use fe_core::Id;
use serde::{Deserialize, Serialize};

use crate::error::{FileError, FileResult};
use crate::model::{Attachment, ParentRef};

/// Row values submitted for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowData {
    pub weight: i32,
    #[serde(default)]
    pub description: Option<String>,
}

/// A batch submission for one parent's attachment list
#[derive(Debug, Clone, Default)]
pub struct Submission {
    /// Every file id that should remain attached, in submission order
    pub order: Vec<Id>,
    pub rows: HashMap<Id, RowData>,
}

impl Submission {
    pub fn new(order: Vec<Id>) -> Self {
        Self {
            order,
            rows: HashMap::new(),
        }
    }

    /// Build from the legacy form encoding (`"3 1 2"` plus row data)
    pub fn from_form(target_ids: &str, rows: HashMap<Id, RowData>) -> FileResult<Self> {
        Ok(Self {
            order: parse_target_ids(target_ids)?,
            rows,
        })
    }

    pub fn row(mut self, file_id: Id, weight: i32) -> Self {
        self.rows.insert(
            file_id,
            RowData {
                weight,
                description: None,
            },
        );
        self
    }

    pub fn described_row(mut self, file_id: Id, weight: i32, description: impl Into<String>) -> Self {
        self.rows.insert(
            file_id,
            RowData {
                weight,
                description: Some(description.into()),
            },
        );
        self
    }
}

/// Parse a whitespace-delimited list of file ids
pub fn parse_target_ids(raw: &str) -> FileResult<Vec<Id>> {
    raw.split_whitespace()
        .map(|token| {
            token
                .parse::<Id>()
                .map_err(|_| FileError::InvalidOrder(format!("'{}' is not a file id", token)))
        })
        .collect()
}

/// Outcome of reconciling a submission against the current list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// New list, sorted by weight with ties in submission order
    pub attachments: Vec<Attachment>,
    /// File ids that were attached before but were not submitted
    pub removed: Vec<Id>,
}

/// Reconcile a submission with the parent's existing attachments
///
/// A submitted id without row data keeps its existing weight and description;
/// one that has neither is rejected. Repeated ids keep their first occurrence.
pub fn reconcile(
    parent: &ParentRef,
    submission: &Submission,
    existing: &[Attachment],
    settings: &AttachmentSettings,
) -> FileResult<Reconciliation> {
    let previous: HashMap<Id, &Attachment> = existing
        .iter()
        .filter(|a| a.parent_id == parent.parent_id)
        .map(|a| (a.file_id, a))
        .collect();

    let mut seen = HashSet::with_capacity(submission.order.len());
    let mut attachments = Vec::with_capacity(submission.order.len());

    for &file_id in &submission.order {
        if !seen.insert(file_id) {
            continue;
        }

        let (weight, description) = match (submission.rows.get(&file_id), previous.get(&file_id)) {
            (Some(row), _) => (row.weight, row.description.clone()),
            (None, Some(prior)) => (prior.weight, prior.description.clone()),
            (None, None) => return Err(FileError::UnknownFileId(file_id)),
        };

        let description = description.filter(|_| parent.field_kind.allows_description());
        if let Some(text) = &description {
            if text.chars().count() > settings.description_max_length {
                return Err(FileError::DescriptionTooLong {
                    file_id,
                    max: settings.description_max_length,
                });
            }
        }

        attachments.push(Attachment {
            parent_id: parent.parent_id,
            file_id,
            description,
            weight,
        });
    }

    // sort_by_key is stable
    attachments.sort_by_key(|a| a.weight);

    let removed = existing
        .iter()
        .filter(|a| a.parent_id == parent.parent_id && !seen.contains(&a.file_id))
        .map(|a| a.file_id)
        .collect();

    Ok(Reconciliation {
        attachments,
        removed,
    })
}
