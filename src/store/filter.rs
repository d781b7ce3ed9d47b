use crate::chunk::Metadata;

/// Exact-match metadata constraints
pub type Filters = Metadata;

/// True when every filter key exists in `metadata` with an equal value
pub fn matches_filters(metadata: &Metadata, filters: &Filters) -> bool {
    filters
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}
