use serde_json::Value;
use thiserror::Error;

use crate::draft::ResponseDraft;
use crate::spec::form::FormSchema;
use crate::validate::{FieldError, validate_page};
use crate::verify::{SchemaError, verify};

/// Where the wizard currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardState {
    Page(u32),
    Submitted,
}

/// Refused transitions. `Invalid` carries the per-field errors so the
/// caller can surface them without re-running validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WizardError {
    #[error("page {page} has invalid fields")]
    Invalid { page: u32, errors: Vec<FieldError> },
    #[error("already on the last page")]
    AtLastPage,
    #[error("already on the first page")]
    AtFirstPage,
    #[error("submit is only available from the last page")]
    NotOnLastPage,
    #[error("response already submitted")]
    AlreadySubmitted,
}

/// State machine over the schema's pages. Forward navigation is gated on
/// validation of the active page; backward navigation never is, so earlier
/// answers can be fixed without losing later ones.
#[derive(Debug, Clone)]
pub struct PageWizard {
    schema: FormSchema,
    draft: ResponseDraft,
    state: WizardState,
}

impl PageWizard {
    /// Verifies the schema and opens the form on page 1.
    pub fn open(schema: FormSchema) -> Result<Self, SchemaError> {
        verify(&schema)?;
        let draft = ResponseDraft::new(&schema);
        Ok(Self {
            schema,
            draft,
            state: WizardState::Page(1),
        })
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn draft(&self) -> &ResponseDraft {
        &self.draft
    }

    pub fn state(&self) -> WizardState {
        self.state
    }

    pub fn current_page(&self) -> Option<u32> {
        match self.state {
            WizardState::Page(page) => Some(page),
            WizardState::Submitted => None,
        }
    }

    /// Applies one user edit; ignored once the response is submitted.
    pub fn set_value(&mut self, name: &str, value: Value) {
        if matches!(self.state, WizardState::Submitted) {
            return;
        }
        self.draft.set_value(&self.schema, name, value);
    }

    pub fn set_attachment(&mut self, field: impl Into<String>, handle: impl Into<String>) {
        self.draft.set_attachment(field, handle);
    }

    pub fn remove_attachment(&mut self, field: &str) {
        self.draft.remove_attachment(field);
    }

    /// Advances to the next page when every visible field on the active
    /// page validates. On refusal the state is unchanged.
    pub fn next(&mut self) -> Result<u32, WizardError> {
        let page = self.active_page()?;
        if page >= self.schema.total_pages {
            return Err(WizardError::AtLastPage);
        }
        self.check_page(page)?;
        self.state = WizardState::Page(page + 1);
        Ok(page + 1)
    }

    /// Steps back one page; always permitted above page 1.
    pub fn previous(&mut self) -> Result<u32, WizardError> {
        let page = self.active_page()?;
        if page <= 1 {
            return Err(WizardError::AtFirstPage);
        }
        self.state = WizardState::Page(page - 1);
        Ok(page - 1)
    }

    /// Runs last-page validation and marks the response submitted. The
    /// draft is then handed to the submission pipeline by the caller.
    pub fn finish(&mut self) -> Result<&ResponseDraft, WizardError> {
        let page = self.active_page()?;
        if page != self.schema.total_pages {
            return Err(WizardError::NotOnLastPage);
        }
        self.check_page(page)?;
        self.state = WizardState::Submitted;
        Ok(&self.draft)
    }

    fn active_page(&self) -> Result<u32, WizardError> {
        match self.state {
            WizardState::Page(page) => Ok(page),
            WizardState::Submitted => Err(WizardError::AlreadySubmitted),
        }
    }

    fn check_page(&self, page: u32) -> Result<(), WizardError> {
        let errors = validate_page(&self.schema, self.draft.values(), page);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(WizardError::Invalid { page, errors })
        }
    }
}
