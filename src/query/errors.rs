use serde::Serialize;

use crate::typechecker::{DiagnosticKind, TyperState};

use super::Loc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
    pub start: Loc,
    pub end: Loc,
}

/// All diagnostics at the cursor state, in buffer order.
pub fn errors(state: &TyperState) -> Vec<ErrorReport> {
    let mut reports = state
        .diagnostics
        .iter()
        .map(|diagnostic| ErrorReport {
            kind: match diagnostic.kind {
                DiagnosticKind::Syntax => "syntax",
                DiagnosticKind::Type => "type",
                DiagnosticKind::Warning => "warning",
                DiagnosticKind::Exception => "exception",
            },
            message: diagnostic.message.clone(),
            start: diagnostic.span.start.into(),
            end: diagnostic.span.end.into(),
        })
        .collect::<Vec<_>>();
    reports.sort_by_key(|report| (report.start.line, report.start.col));
    reports
}
