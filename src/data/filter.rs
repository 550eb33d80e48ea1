use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::model::{MetadataValue, SpectralDataset, Spectrum};

// ---------------------------------------------------------------------------
// Constraint: one predicate on one metadata column
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    /// Numeric value in `[min, max]`.
    Between { column: String, min: f64, max: f64 },
    /// Value is one of `values`. A spectrum without the column counts as
    /// [`MetadataValue::Null`]; an empty set selects nothing.
    OneOf {
        column: String,
        values: BTreeSet<MetadataValue>,
    },
}

impl Constraint {
    pub fn between(column: &str, min: f64, max: f64) -> Self {
        Constraint::Between {
            column: column.to_string(),
            min,
            max,
        }
    }

    pub fn one_of<I, V>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<MetadataValue>,
    {
        Constraint::OneOf {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Constraint::Between { column, .. } | Constraint::OneOf { column, .. } => column,
        }
    }

    pub fn matches(&self, spectrum: &Spectrum) -> bool {
        match self {
            Constraint::Between { column, min, max } => spectrum
                .metadata_f64(column)
                .is_some_and(|v| v >= *min && v <= *max),
            Constraint::OneOf { column, values } => match spectrum.metadata.get(column) {
                Some(val) => values.contains(val),
                // spectrum doesn't have this column → include only if Null is selected
                None => values.contains(&MetadataValue::Null),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Selection: the members of one composite
// ---------------------------------------------------------------------------

/// A labelled conjunction of constraints. No constraints selects everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub label: String,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl Selection {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            constraints: Vec::new(),
        }
    }

    pub fn with(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn matches(&self, spectrum: &Spectrum) -> bool {
        self.constraints.iter().all(|c| c.matches(spectrum))
    }
}

/// Return indices of spectra that pass every constraint of `selection`.
pub fn filtered_indices(dataset: &SpectralDataset, selection: &Selection) -> Vec<usize> {
    dataset
        .spectra
        .iter()
        .enumerate()
        .filter(|(_, sp)| selection.matches(sp))
        .map(|(i, _)| i)
        .collect()
}

/// Keep the first index for every distinct value of `column`, preserving
/// order. Spectra without the column are kept.
pub fn unique_by(dataset: &SpectralDataset, indices: &[usize], column: &str) -> Vec<usize> {
    let mut seen = BTreeSet::new();
    indices
        .iter()
        .copied()
        .filter(|&i| match dataset.spectra.get(i).and_then(|sp| sp.metadata.get(column)) {
            Some(MetadataValue::Null) | None => true,
            Some(val) => seen.insert(val.clone()),
        })
        .collect()
}

/// Mean of a numeric column over `indices`, ignoring spectra without it.
pub fn mean_of(dataset: &SpectralDataset, indices: &[usize], column: &str) -> Option<f64> {
    let values: Vec<f64> = indices
        .iter()
        .filter_map(|&i| dataset.spectra.get(i)?.metadata_f64(column))
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
