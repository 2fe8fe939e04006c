//! AST for the compact query form

/// Parsed query text, names not yet resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryText {
    pub grain: Option<String>,
    pub temporal_column: Option<String>,
    pub measures: Vec<MeasureCall>,
    pub group_by: Vec<String>,
    pub range: Option<RangeText>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureCall {
    pub func: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeText {
    pub start: String,
    pub end: String,
}
