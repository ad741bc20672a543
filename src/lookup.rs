//! Static keyword lookup used when no indexing service is configured.
//!
//! A query matches when it contains every keyword, compared
//! case-insensitively. Anything else is a `NoMatch`.

use async_trait::async_trait;

use crate::config::ScoreConvention;
use crate::error::QueryError;
use crate::models::{Match, QueryOutcome};
use crate::traits::QueryResolver;

const KEYWORDS: [&str; 2] = ["kovács", "bónusz"];
const SOURCE_DOCUMENT: &str = "bonuszok_2023.xlsx";
const SNIPPET: &str = "Kovács János (IT Osztály) 2023-as bónusza: 500,000 Ft. Kifizetve: 2024.01.10.";
const CONFIDENCE: f64 = 0.95;

#[derive(Debug, Default, Clone, Copy)]
pub struct StaticLookup;

impl StaticLookup {
    pub fn new() -> Self {
        Self
    }

    pub fn lookup(&self, query_text: &str) -> QueryOutcome {
        let needle = query_text.to_lowercase();
        if KEYWORDS.iter().all(|k| needle.contains(k)) {
            QueryOutcome::Match(Match {
                source_document_path: SOURCE_DOCUMENT.to_string(),
                text_snippet: SNIPPET.to_string(),
                distance_score: CONFIDENCE,
            })
        } else {
            QueryOutcome::NoMatch
        }
    }
}

#[async_trait]
impl QueryResolver for StaticLookup {
    fn name(&self) -> &str {
        "static"
    }

    fn score_convention(&self) -> ScoreConvention {
        ScoreConvention::Similarity
    }

    async fn resolve(&self, query_text: &str) -> Result<QueryOutcome, QueryError> {
        if query_text.trim().is_empty() {
            return Err(QueryError::invalid_argument("query must not be empty"));
        }
        Ok(self.lookup(query_text))
    }
}
