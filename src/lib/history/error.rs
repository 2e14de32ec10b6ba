#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HistoryError {
    #[error("History field {field:?} holds {found} samples, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("History field {0:?} is required but was not reported")]
    MissingField(&'static str),
}
