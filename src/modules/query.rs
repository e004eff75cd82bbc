use derive_more::with_trait::Display;

/// Prefix of an external (IMDb) identifier; the rest must be ASCII digits.
pub const IMDB_ID_PREFIX: &str = "tt";

/// What the operator typed into the search box, classified.
#[derive(Debug, Clone, Display, PartialEq, Eq)]
pub enum SearchQuery {
    #[display("id:{_0}")]
    ImdbId(String),
    #[display("title:{_0}")]
    Title(String),
}

pub trait Searchable {
    /// Provider query parameters for this lookup, excluding the API key.
    fn to_query_pairs(&self) -> Vec<(&'static str, String)>;
}

pub fn is_imdb_id(text: &str) -> bool {
    text.strip_prefix(IMDB_ID_PREFIX)
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

impl SearchQuery {
    /// Returns `None` for blank input.
    pub fn classify(input: &str) -> Option<Self> {
        let text = input.trim();
        if text.is_empty() {
            None
        } else if is_imdb_id(text) {
            Some(SearchQuery::ImdbId(text.to_string()))
        } else {
            Some(SearchQuery::Title(text.to_string()))
        }
    }

    pub fn text(&self) -> &str {
        match self {
            SearchQuery::ImdbId(id) => id,
            SearchQuery::Title(title) => title,
        }
    }
}

impl Searchable for SearchQuery {
    fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            SearchQuery::ImdbId(id) => vec![("i", id.clone()), ("page", "1".to_string())],
            SearchQuery::Title(title) => vec![("s", title.clone()), ("page", "1".to_string())],
        }
    }
}
