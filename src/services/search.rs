// Full text search over catalog items.
//
// Documents live in an FTS5 table of the state store and are replaced after
// every complete scan. FTS5 finds candidates by bm25; names are then ranked
// with the skim matcher. Queries that hit no indexed term fall back to a
// Jaro-Winkler comparison of name words, which catches typos.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::collection::{Catalog, Entity};
use crate::db::{DbResult, Repository};
use crate::models::SearchDocument;

/// Candidates fetched from FTS5 before ranking.
const CANDIDATE_LIMIT: usize = 200;
/// Similarity a name word needs to pass as a misspelling of a query word.
const TYPO_SIMILARITY: f64 = 0.9;
/// Name similarity below which `similar` ignores names.
const NAME_SIMILARITY: f64 = 0.8;
const EXACT_NAME_BONUS: i64 = 1_000;

struct Indexed {
    doc: SearchDocument,
    name_lower: String,
    name_words: Vec<String>,
    genres: HashSet<String>,
    people: HashSet<String>,
}

impl Indexed {
    fn new(doc: SearchDocument) -> Self {
        Indexed {
            name_lower: doc.name.to_lowercase(),
            name_words: words(&doc.name),
            genres: doc.genres.iter().map(|g| g.to_lowercase()).collect(),
            people: doc.people.iter().map(|p| p.to_lowercase()).collect(),
            doc,
        }
    }
}

pub struct SearchIndex {
    repo: Repository,
    docs: RwLock<Vec<Indexed>>,
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

/// Build an FTS5 MATCH expression: every term of two or more chars becomes a
/// quoted prefix query, OR'ed together.
fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .filter(|s| s.chars().count() >= 2)
        .map(|s| s.replace(['"', '\'', '*'], "").replace('-', " "))
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("\"{}\"*", s))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Order FTS candidates: exact name first, then skim score, then bm25 rank.
fn rank_candidates(docs: &[Indexed], query: &str, candidates: &[String]) -> Vec<String> {
    let by_id: HashMap<&str, &Indexed> = docs.iter().map(|d| (d.doc.id.as_str(), d)).collect();
    let matcher = SkimMatcherV2::default().ignore_case();
    let lower = query.to_lowercase();

    let mut scored: Vec<(i64, usize, &str)> = candidates
        .iter()
        .enumerate()
        .filter_map(|(pos, id)| {
            let d = by_id.get(id.as_str())?;
            let mut score = matcher.fuzzy_match(&d.doc.name, query).unwrap_or(0);
            if d.name_lower == lower {
                score += EXACT_NAME_BONUS;
            }
            Some((score, pos, d.doc.id.as_str()))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    scored.into_iter().map(|(_, _, id)| id.to_string()).collect()
}

/// Names where every query word is a prefix or close misspelling of a name
/// word. Best average similarity first.
fn typo_matches(docs: &[Indexed], query: &str) -> Vec<String> {
    let q_words = words(query);
    if q_words.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(f64, &Indexed)> = docs
        .iter()
        .filter_map(|d| {
            let mut total = 0.0;
            for q in &q_words {
                let best = d
                    .name_words
                    .iter()
                    .map(|w| {
                        if w.starts_with(q.as_str()) {
                            1.0
                        } else {
                            strsim::jaro_winkler(q, w)
                        }
                    })
                    .fold(0.0, f64::max);
                if best < TYPO_SIMILARITY {
                    return None;
                }
                total += best;
            }
            Some((total / q_words.len() as f64, d))
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| a.1.doc.sort_name.cmp(&b.1.doc.sort_name))
    });
    scored.into_iter().map(|(_, d)| d.doc.id.clone()).collect()
}

impl SearchIndex {
    pub fn new(repo: Repository) -> Self {
        SearchIndex {
            repo,
            docs: RwLock::new(Vec::new()),
        }
    }

    /// Replace the whole index with documents for every catalog item.
    pub async fn rebuild(&self, catalog: &Catalog) -> DbResult<()> {
        let documents: Vec<SearchDocument> = catalog
            .all_items()
            .into_iter()
            .map(|r| {
                let md = &r.item.metadata;
                let people = md
                    .actors()
                    .iter()
                    .map(|a| a.name.clone())
                    .chain(md.directors().iter().cloned())
                    .chain(md.writers().iter().cloned())
                    .collect();
                SearchDocument {
                    id: r.item.id.clone(),
                    parent_id: r.collection.id.clone(),
                    name: r.item.name(),
                    sort_name: r.item.sort_name(),
                    overview: md.plot().to_string(),
                    genres: md.genres().to_vec(),
                    people,
                }
            })
            .collect();
        self.index(documents).await
    }

    pub async fn index(&self, documents: Vec<SearchDocument>) -> DbResult<()> {
        self.repo.replace_search_documents(&documents).await?;
        let count = documents.len();
        *self.docs.write() = documents.into_iter().map(Indexed::new).collect();
        tracing::debug!("Search index rebuilt: {} documents", count);
        Ok(())
    }

    /// Item ids matching `query`, best first.
    pub async fn search(&self, query: &str, limit: usize) -> DbResult<Vec<String>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let fts = fts_query(query);
        let candidates = if fts.is_empty() {
            Vec::new()
        } else {
            self.repo.search_documents(&fts, CANDIDATE_LIMIT).await?
        };

        let docs = self.docs.read();
        let mut hits = if candidates.is_empty() {
            typo_matches(&docs, query)
        } else {
            rank_candidates(&docs, query, &candidates)
        };
        hits.truncate(limit);
        Ok(hits)
    }

    /// Items in the same collection that resemble `id`, best first.
    pub fn similar(&self, id: &str, limit: usize) -> Vec<String> {
        let docs = self.docs.read();
        let Some(me) = docs.iter().find(|d| d.doc.id == id) else {
            return Vec::new();
        };

        let mut scored: Vec<(f64, &Indexed)> = docs
            .iter()
            .filter(|d| d.doc.parent_id == me.doc.parent_id && d.doc.id != me.doc.id)
            .map(|d| {
                let name = strsim::jaro_winkler(&d.name_lower, &me.name_lower);
                let name = if name >= NAME_SIMILARITY { name * 2.0 } else { 0.0 };
                let genres = d.genres.intersection(&me.genres).count() as f64;
                let people = d.people.intersection(&me.people).count() as f64;
                (name + genres * 1.5 + people, d)
            })
            .filter(|(s, _)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.doc.sort_name.cmp(&b.1.doc.sort_name))
        });
        scored
            .into_iter()
            .take(limit)
            .map(|(_, d)| d.doc.id.clone())
            .collect()
    }

    /// Distinct person names containing every query token as a word prefix.
    pub fn people(&self, query: &str, limit: usize) -> Vec<String> {
        let q_tokens = words(query);
        let docs = self.docs.read();
        let mut found = BTreeSet::new();
        for d in docs.iter() {
            for person in &d.doc.people {
                let person_words = words(person);
                if q_tokens
                    .iter()
                    .all(|q| person_words.iter().any(|w| w.starts_with(q.as_str())))
                {
                    found.insert(person.clone());
                }
            }
        }
        found.into_iter().take(limit).collect()
    }
}
