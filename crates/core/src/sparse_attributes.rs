use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use surfing_geometry::write_atomic;
use thiserror::Error;
use tracing::info;

use crate::error::SurfingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    Int,
    Float,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum AttributeColumn {
    Int(Vec<i64>),
    #[serde(with = "float_values")]
    Float(Vec<f64>),
}

/// JSON has no NaN or infinities, so those are written as the strings
/// `"NaN"`, `"inf"` and `"-inf"`.
mod float_values {
    use serde::de::{self, Deserializer};
    use serde::ser::{SerializeSeq, Serializer};
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Entry {
        Number(f64),
        Special(String),
    }

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for &value in values {
            if value.is_finite() {
                seq.serialize_element(&value)?;
            } else if value.is_nan() {
                seq.serialize_element("NaN")?;
            } else if value > 0.0 {
                seq.serialize_element("inf")?;
            } else {
                seq.serialize_element("-inf")?;
            }
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        Vec::<Entry>::deserialize(deserializer)?
            .into_iter()
            .map(|entry| match entry {
                Entry::Number(value) => Ok(value),
                Entry::Special(text) => match text.as_str() {
                    "NaN" => Ok(f64::NAN),
                    "inf" => Ok(f64::INFINITY),
                    "-inf" => Ok(f64::NEG_INFINITY),
                    other => Err(de::Error::custom(format!("invalid float {other:?}"))),
                },
            })
            .collect()
    }
}

impl AttributeColumn {
    pub fn len(&self) -> usize {
        match self {
            AttributeColumn::Int(values) => values.len(),
            AttributeColumn::Float(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> AttributeType {
        match self {
            AttributeColumn::Int(_) => AttributeType::Int,
            AttributeColumn::Float(_) => AttributeType::Float,
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> AttributeRef<'_> {
        match self {
            AttributeColumn::Int(values) => AttributeRef::Int(&values[start..end]),
            AttributeColumn::Float(values) => AttributeRef::Float(&values[start..end]),
        }
    }

    fn empty_like(&self) -> Self {
        match self {
            AttributeColumn::Int(_) => AttributeColumn::Int(Vec::new()),
            AttributeColumn::Float(_) => AttributeColumn::Float(Vec::new()),
        }
    }

    fn append(&mut self, other: AttributeColumn) -> Result<(), AttributeType> {
        match (self, other) {
            (AttributeColumn::Int(values), AttributeColumn::Int(more)) => values.extend(more),
            (AttributeColumn::Float(values), AttributeColumn::Float(more)) => values.extend(more),
            (_, other) => return Err(other.data_type()),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeRef<'a> {
    Int(&'a [i64]),
    Float(&'a [f64]),
}

impl<'a> AttributeRef<'a> {
    pub fn len(&self) -> usize {
        match self {
            AttributeRef::Int(values) => values.len(),
            AttributeRef::Float(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> AttributeType {
        match self {
            AttributeRef::Int(_) => AttributeType::Int,
            AttributeRef::Float(_) => AttributeType::Float,
        }
    }

    pub fn value(&self, index: usize) -> Option<AttributeValue> {
        match self {
            AttributeRef::Int(values) => values.get(index).copied().map(AttributeValue::Int),
            AttributeRef::Float(values) => values.get(index).copied().map(AttributeValue::Float),
        }
    }

    pub fn values(&self) -> Vec<AttributeValue> {
        (0..self.len()).filter_map(|i| self.value(i)).collect()
    }

    pub fn as_int(&self) -> Option<&'a [i64]> {
        match *self {
            AttributeRef::Int(values) => Some(values),
            AttributeRef::Float(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<&'a [f64]> {
        match *self {
            AttributeRef::Float(values) => Some(values),
            AttributeRef::Int(_) => None,
        }
    }
}

/// A single stored value. Floats order and compare by `total_cmp`, so the
/// type can key maps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AttributeValue {}

impl PartialOrd for AttributeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AttributeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (AttributeValue::Int(a), AttributeValue::Int(b)) => a.cmp(b),
            (AttributeValue::Float(a), AttributeValue::Float(b)) => a.total_cmp(b),
            (AttributeValue::Int(_), AttributeValue::Float(_)) => Ordering::Less,
            (AttributeValue::Float(_), AttributeValue::Int(_)) => Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttributeError {
    #[error("label {label:?} has {actual} values, expected {expected}")]
    LengthMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },
    #[error("bundle is missing label {0:?}")]
    MissingLabel(String),
    #[error("label {0:?} is not registered")]
    UnknownLabel(String),
    #[error("label {0:?} given twice")]
    DuplicateLabel(String),
    #[error("key {0} already present")]
    DuplicateKey(usize),
    #[error("label {label:?} holds {expected:?} values, got {actual:?}")]
    TypeMismatch {
        label: String,
        expected: AttributeType,
        actual: AttributeType,
    },
    #[error("metadata {0:?} already set")]
    MetadataExists(String),
    #[error("inconsistent attribute data: {0}")]
    Corrupt(String),
}

/// Per-key variable-length records over a fixed set of labelled columns.
///
/// Every key owns one contiguous run in each column; all runs of a key have
/// the same length. Keys keep their insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SparseAttributesRepr", into = "SparseAttributesRepr")]
pub struct SparseAttributes {
    labels: Vec<String>,
    columns: Vec<Option<AttributeColumn>>,
    keys: Vec<usize>,
    offsets: Vec<usize>,
    slots: BTreeMap<usize, usize>,
    metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Serialize, Deserialize)]
struct SparseAttributesRepr {
    labels: Vec<String>,
    keys: Vec<usize>,
    offsets: Vec<usize>,
    columns: Vec<Option<AttributeColumn>>,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl From<SparseAttributes> for SparseAttributesRepr {
    fn from(attrs: SparseAttributes) -> Self {
        Self {
            labels: attrs.labels,
            keys: attrs.keys,
            offsets: attrs.offsets,
            columns: attrs.columns,
            metadata: attrs.metadata,
        }
    }
}

impl TryFrom<SparseAttributesRepr> for SparseAttributes {
    type Error = AttributeError;

    fn try_from(repr: SparseAttributesRepr) -> Result<Self, Self::Error> {
        let corrupt = |message: String| Err(AttributeError::Corrupt(message));

        let unique: BTreeSet<&String> = repr.labels.iter().collect();
        if unique.len() != repr.labels.len() {
            return corrupt("duplicate labels".to_string());
        }
        if repr.columns.len() != repr.labels.len() {
            return corrupt(format!(
                "{} columns for {} labels",
                repr.columns.len(),
                repr.labels.len()
            ));
        }
        if repr.offsets.len() != repr.keys.len() + 1 || repr.offsets.first() != Some(&0) {
            return corrupt(format!(
                "{} offsets for {} keys",
                repr.offsets.len(),
                repr.keys.len()
            ));
        }
        if repr.offsets.windows(2).any(|w| w[0] > w[1]) {
            return corrupt("offsets are not ascending".to_string());
        }
        let total = repr.offsets.last().copied().unwrap_or(0);
        for (label, column) in repr.labels.iter().zip(&repr.columns) {
            let len = column.as_ref().map_or(0, AttributeColumn::len);
            let typed = column.is_some() || repr.keys.is_empty();
            if len != total || !typed {
                return corrupt(format!(
                    "column {label:?} has {len} values, offsets cover {total}"
                ));
            }
        }

        let mut slots = BTreeMap::new();
        for (slot, &key) in repr.keys.iter().enumerate() {
            if slots.insert(key, slot).is_some() {
                return Err(AttributeError::DuplicateKey(key));
            }
        }

        Ok(Self {
            labels: repr.labels,
            columns: repr.columns,
            keys: repr.keys,
            offsets: repr.offsets,
            slots,
            metadata: repr.metadata,
        })
    }
}

impl SparseAttributes {
    pub fn new<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Result<Self, AttributeError> {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        let mut seen = BTreeSet::new();
        for label in &labels {
            if !seen.insert(label) {
                return Err(AttributeError::DuplicateLabel(label.clone()));
            }
        }
        Ok(Self {
            columns: vec![None; labels.len()],
            labels,
            keys: Vec::new(),
            offsets: vec![0],
            slots: BTreeMap::new(),
            metadata: BTreeMap::new(),
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> &[usize] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains_key(&self, key: usize) -> bool {
        self.slots.contains_key(&key)
    }

    fn label_index(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn data_type(&self, label: &str) -> Option<AttributeType> {
        let column = self.columns.get(self.label_index(label)?)?;
        column.as_ref().map(AttributeColumn::data_type)
    }

    /// Adds one record per label for `key`. The bundle must name every
    /// registered label exactly once, with equally long columns.
    pub fn add<S: Into<String>>(
        &mut self,
        key: usize,
        bundle: impl IntoIterator<Item = (S, AttributeColumn)>,
    ) -> Result<(), AttributeError> {
        if self.slots.contains_key(&key) {
            return Err(AttributeError::DuplicateKey(key));
        }

        let mut incoming: Vec<Option<AttributeColumn>> = vec![None; self.labels.len()];
        for (label, column) in bundle {
            let label = label.into();
            let index = self
                .label_index(&label)
                .ok_or_else(|| AttributeError::UnknownLabel(label.clone()))?;
            if incoming[index].is_some() {
                return Err(AttributeError::DuplicateLabel(label));
            }
            incoming[index] = Some(column);
        }

        let mut run = None;
        for (index, column) in incoming.iter().enumerate() {
            let label = &self.labels[index];
            let column = column
                .as_ref()
                .ok_or_else(|| AttributeError::MissingLabel(label.clone()))?;
            if let Some(existing) = &self.columns[index] {
                if existing.data_type() != column.data_type() {
                    return Err(AttributeError::TypeMismatch {
                        label: label.clone(),
                        expected: existing.data_type(),
                        actual: column.data_type(),
                    });
                }
            }
            match run {
                None => run = Some(column.len()),
                Some(expected) if expected != column.len() => {
                    return Err(AttributeError::LengthMismatch {
                        label: label.clone(),
                        expected,
                        actual: column.len(),
                    });
                }
                Some(_) => {}
            }
        }

        for (slot, column) in self.columns.iter_mut().zip(incoming.into_iter().flatten()) {
            match slot {
                Some(existing) => {
                    existing
                        .append(column)
                        .map_err(|_| AttributeError::Corrupt("column type changed".into()))?;
                }
                None => {
                    let mut fresh = column.empty_like();
                    fresh
                        .append(column)
                        .map_err(|_| AttributeError::Corrupt("column type changed".into()))?;
                    *slot = Some(fresh);
                }
            }
        }

        let end = self.offsets.last().copied().unwrap_or(0) + run.unwrap_or(0);
        self.slots.insert(key, self.keys.len());
        self.keys.push(key);
        self.offsets.push(end);
        Ok(())
    }

    fn run(&self, key: usize) -> Option<(usize, usize)> {
        let slot = *self.slots.get(&key)?;
        Some((self.offsets[slot], self.offsets[slot + 1]))
    }

    /// Values of `label` for `key`. `None` when the key is absent; an empty
    /// slice when the key is present with no entries.
    pub fn get(&self, key: usize, label: &str) -> Option<AttributeRef<'_>> {
        let (start, end) = self.run(key)?;
        let column = self.columns.get(self.label_index(label)?)?.as_ref()?;
        Some(column.slice(start, end))
    }

    /// Per position of `key`'s run, one value per label in label order.
    pub fn get_tuple(&self, key: usize) -> Option<Vec<Vec<AttributeValue>>> {
        let (start, end) = self.run(key)?;
        let columns: Vec<AttributeRef<'_>> = self
            .columns
            .iter()
            .map(|c| c.as_ref().map(|c| c.slice(start, end)))
            .collect::<Option<_>>()?;
        Some(
            (0..end - start)
                .map(|i| columns.iter().filter_map(|c| c.value(i)).collect())
                .collect(),
        )
    }

    pub fn attribute_mapping(
        &self,
        label: &str,
    ) -> Result<BTreeMap<usize, AttributeRef<'_>>, AttributeError> {
        if self.label_index(label).is_none() {
            return Err(AttributeError::UnknownLabel(label.to_string()));
        }
        Ok(self
            .keys
            .iter()
            .filter_map(|&key| Some((key, self.get(key, label)?)))
            .collect())
    }

    /// For every value of `label`, the keys whose runs contain it.
    pub fn inverse_mapping(
        &self,
        label: &str,
    ) -> Result<BTreeMap<AttributeValue, BTreeSet<usize>>, AttributeError> {
        let mut inverse: BTreeMap<AttributeValue, BTreeSet<usize>> = BTreeMap::new();
        for (key, values) in self.attribute_mapping(label)? {
            for value in values.values() {
                inverse.entry(value).or_default().insert(key);
            }
        }
        Ok(inverse)
    }

    pub fn add_metadata(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), AttributeError> {
        let key = key.into();
        if self.metadata.contains_key(&key) {
            return Err(AttributeError::MetadataExists(key));
        }
        self.metadata.insert(key, value);
        Ok(())
    }

    pub fn metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    pub fn metadata_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, SurfingError> {
        let value = self
            .metadata
            .get(key)
            .ok_or_else(|| SurfingError::MissingMetadata(key.to_string()))?;
        Ok(T::deserialize(value)?)
    }

    pub fn to_json(&self) -> Result<String, SurfingError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, SurfingError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SurfingError> {
        let path = path.as_ref();
        write_atomic(path, true, |w| {
            serde_json::to_writer(&mut *w, self).map_err(io::Error::from)
        })?;
        info!(path = %path.display(), keys = self.len(), "saved attributes");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SurfingError> {
        let path = path.as_ref();
        let attrs = Self::from_json(&fs::read_to_string(path)?)?;
        info!(path = %path.display(), keys = attrs.len(), "loaded attributes");
        Ok(attrs)
    }
}

impl PartialEq for SparseAttributes {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels
            && self.slots.len() == other.slots.len()
            && self
                .slots
                .keys()
                .all(|&key| other.contains_key(key) && self.get_tuple(key) == other.get_tuple(key))
    }
}
