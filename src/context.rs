//! Execution context passed explicitly into every public operation

use tracing::Span;

/// Project scope and logging span for one caller
///
/// Registry lookups are scoped by `project`; operations run inside `span`.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    project: String,
    span: Span,
}

impl ExecutionContext {
    pub fn new(project: impl Into<String>) -> Self {
        let project = project.into();
        let span = tracing::info_span!("lifecycle", project = %project);
        Self { project, span }
    }

    /// Use a caller-provided span instead of the default one
    pub fn with_span(project: impl Into<String>, span: Span) -> Self {
        Self {
            project: project.into(),
            span,
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }
}
