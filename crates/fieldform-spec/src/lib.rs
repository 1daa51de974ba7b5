#![allow(missing_docs)]

pub mod draft;
pub mod formula;
pub mod spec;
pub mod validate;
pub mod verify;
pub mod visibility;
pub mod wizard;

pub use draft::{ResponseDraft, ValueMap};
pub use formula::{Formula, FormulaError, apply_computed, round_to};
pub use spec::{
    Calculation, ConditionMode, ConditionOperator, FieldDefinition, FieldKind, FieldOption,
    FormSchema, GeometryKind, RuleKind, Section, ValidationRule, VisibilityCondition,
};
pub use validate::{FieldError, validate_field, validate_page};
pub use verify::{SchemaError, parse, verify};
pub use visibility::{VisibilityMap, is_visible, resolve_visibility};
pub use wizard::{PageWizard, WizardError, WizardState};
