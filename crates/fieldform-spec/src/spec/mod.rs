pub mod field;
pub mod form;

pub use field::{
    Calculation, ConditionMode, ConditionOperator, FieldDefinition, FieldKind, FieldOption,
    RuleKind, ValidationRule, VisibilityCondition,
};
pub use form::{FormSchema, GeometryKind, Section};
