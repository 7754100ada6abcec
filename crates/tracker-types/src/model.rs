//! Dictionary model entries.
//!
//! Models are global to the repository. The model tracker keeps the
//! latest version of each model and other trackers consult it when
//! transforming node properties.

use serde::{Deserialize, Serialize};

use crate::node::{PropertyValue, QName};

/// Declared type of a model property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Text,
    Long,
    Double,
    Boolean,
    Date,
    Content,
    Any,
}

impl DataType {
    /// Whether `value` conforms to this declared type.
    ///
    /// Multi-valued properties conform when every element does.
    pub fn accepts(&self, value: &PropertyValue) -> bool {
        match (self, value) {
            (DataType::Any, _) => true,
            (_, PropertyValue::Multi(values)) => values.iter().all(|v| self.accepts(v)),
            (DataType::Text, PropertyValue::Text(_)) => true,
            (DataType::Long, PropertyValue::Long(_)) => true,
            (DataType::Double, PropertyValue::Double(_) | PropertyValue::Long(_)) => true,
            (DataType::Boolean, PropertyValue::Boolean(_)) => true,
            (DataType::Date, PropertyValue::Date(_)) => true,
            (DataType::Content, PropertyValue::Content { .. }) => true,
            _ => false,
        }
    }
}

/// A property declared by a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: QName,
    pub data_type: DataType,
}

impl PropertyDefinition {
    pub fn new(name: impl Into<QName>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A versioned dictionary model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryModel {
    pub name: QName,
    /// Repository timestamp of this model version (milliseconds)
    pub timestamp_ms: u64,
    pub properties: Vec<PropertyDefinition>,
}

impl DictionaryModel {
    pub fn new(name: impl Into<QName>, timestamp_ms: u64) -> Self {
        Self {
            name: name.into(),
            timestamp_ms,
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<QName>, data_type: DataType) -> Self {
        self.properties.push(PropertyDefinition::new(name, data_type));
        self
    }

    pub fn property(&self, name: &QName) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| &p.name == name)
    }
}
