use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::spec::field::FieldDefinition;

/// Geometry a response of this schema captures alongside its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    #[default]
    None,
    Point,
    Line,
    Polygon,
}

/// Logical grouping of fields assigned to one wizard page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(rename = "pageNumber")]
    pub page_number: u32,
}

/// Top-level form definition consumed from the authoring collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FormSchema {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub geometry_type: GeometryKind,
    #[serde(default, rename = "multiPage")]
    pub multi_page: bool,
    #[serde(default = "default_total_pages", rename = "totalPages")]
    pub total_pages: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<Section>,
    pub fields: Vec<FieldDefinition>,
}

fn default_total_pages() -> u32 {
    1
}

impl FormSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.id == id)
    }

    /// Page a field is placed on via its section, if the section exists.
    pub fn page_of(&self, field: &FieldDefinition) -> Option<u32> {
        self.section(&field.section_id)
            .map(|section| section.page_number)
    }

    /// Fields belonging to sections on the given page, in declaration order.
    pub fn fields_on_page(&self, page: u32) -> impl Iterator<Item = &FieldDefinition> {
        self.fields
            .iter()
            .filter(move |field| self.page_of(field) == Some(page))
    }
}
