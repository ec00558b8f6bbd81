//! TF-IDF text similarity shared by the content and interest scorers
//!
//! Documents are cleaned, tokenized and projected into a TF-IDF space fitted
//! over the query and candidate documents of one request. Rows are L2
//! normalized, so cosine similarity reduces to a dot product.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::{SimilarityAggregation, TextField};
use crate::types::{Item, ItemKind};

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "do", "for", "from", "has", "have", "how", "if", "in", "into", "is", "it",
    "its", "more", "not", "of", "on", "or", "our", "so", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "to", "was", "we", "were", "what", "when", "which",
    "who", "will", "with", "you", "your",
];

/// Strip markup, lowercase, replace punctuation with spaces, collapse
/// whitespace and truncate to `max_len` characters.
pub fn clean_text(text: &str, max_len: usize) -> String {
    let mut stripped = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => {
                in_tag = true;
                stripped.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            _ if c.is_alphanumeric() || c == '_' => stripped.extend(c.to_lowercase()),
            _ => stripped.push(' '),
        }
    }

    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_len {
        return collapsed;
    }
    collapsed
        .chars()
        .take(max_len)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Split a cleaned document into index terms
pub fn tokenize(document: &str) -> Vec<&str> {
    document
        .split_whitespace()
        .filter(|token| token.chars().count() > 1 && !STOP_WORDS.contains(token))
        .collect()
}

/// Builds the text document of an item from the configured fields
#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    course_fields: Vec<TextField>,
    activity_fields: Vec<TextField>,
    max_content_length: usize,
}

impl DocumentBuilder {
    pub fn new(
        course_fields: Vec<TextField>,
        activity_fields: Vec<TextField>,
        max_content_length: usize,
    ) -> Self {
        Self {
            course_fields,
            activity_fields,
            max_content_length,
        }
    }

    pub fn from_config(config: &crate::config::ContentConfig) -> Self {
        Self::new(
            config.analyzed_course_fields.clone(),
            config.analyzed_activity_fields.clone(),
            config.max_content_length,
        )
    }

    pub fn build(&self, item: &Item) -> String {
        let fields = match item.kind {
            ItemKind::Course => &self.course_fields,
            ItemKind::Activity => &self.activity_fields,
        };

        let raw = fields
            .iter()
            .map(|field| match field {
                TextField::Name => item.name.clone(),
                TextField::Description => item.description.clone(),
                TextField::Category => item.category.clone(),
                TextField::Tags => item.tags.iter().cloned().collect::<Vec<_>>().join(" "),
            })
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        clean_text(&raw, self.max_content_length)
    }

    pub fn build_all(&self, items: &[Item]) -> Vec<String> {
        items.iter().map(|item| self.build(item)).collect()
    }
}

/// TF-IDF vector space fitted on a fixed corpus
#[derive(Debug, Clone)]
pub struct TfIdfSpace {
    vocabulary: HashMap<String, usize>,
    idf: Array1<f64>,
}

impl TfIdfSpace {
    /// Fit with smoothed idf: ln((1 + n) / (1 + df)) + 1
    pub fn fit<S: AsRef<str>>(documents: &[S]) -> Self {
        let mut document_frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for document in documents {
            let terms: BTreeSet<&str> = tokenize(document.as_ref()).into_iter().collect();
            for term in terms {
                *document_frequency.entry(term).or_insert(0) += 1;
            }
        }

        let n = documents.len() as f64;
        let mut vocabulary = HashMap::with_capacity(document_frequency.len());
        let mut idf = Array1::zeros(document_frequency.len());
        for (index, (term, df)) in document_frequency.into_iter().enumerate() {
            vocabulary.insert(term.to_string(), index);
            idf[index] = ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0;
        }

        Self { vocabulary, idf }
    }

    pub fn dimension(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }

    /// L2-normalized TF-IDF vector; all zeros when no term is known
    pub fn transform(&self, document: &str) -> Array1<f64> {
        let mut vector = Array1::zeros(self.dimension());
        for term in tokenize(document) {
            if let Some(&index) = self.vocabulary.get(term) {
                vector[index] += 1.0;
            }
        }
        vector *= &self.idf;
        normalize(&mut vector);
        vector
    }

    /// One normalized row per document
    pub fn transform_all<S: AsRef<str>>(&self, documents: &[S]) -> Array2<f64> {
        let mut matrix = Array2::zeros((documents.len(), self.dimension()));
        for (mut row, document) in matrix.axis_iter_mut(Axis(0)).zip(documents) {
            row.assign(&self.transform(document.as_ref()));
        }
        matrix
    }
}

fn normalize(vector: &mut Array1<f64>) {
    let norm = vector.dot(vector).sqrt();
    if norm > 0.0 {
        *vector /= norm;
    }
}

/// Cosine similarity of two vectors, 0 when either is all zeros
pub fn cosine_similarity(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Jaccard coefficient of two tag sets. Empty sets share nothing.
pub fn jaccard_similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let intersection = a.intersection(b).count();
    let union = a.union(b).count();

    intersection as f64 / union as f64
}

/// Similarity of each document to a set of query documents, aligned with
/// `documents`. The TF-IDF space is fitted over queries and documents
/// together. No queries means no similarity.
pub fn similarity_to_queries(
    queries: &[String],
    documents: &[String],
    aggregation: SimilarityAggregation,
) -> Vec<f64> {
    if queries.is_empty() || documents.is_empty() {
        return vec![0.0; documents.len()];
    }

    let corpus: Vec<&str> = queries
        .iter()
        .chain(documents.iter())
        .map(String::as_str)
        .collect();
    let space = TfIdfSpace::fit(&corpus);
    if space.is_empty() {
        return vec![0.0; documents.len()];
    }

    let query_matrix = space.transform_all(queries);
    let document_matrix = space.transform_all(documents);

    let similarities = match aggregation {
        SimilarityAggregation::Max => document_matrix
            .dot(&query_matrix.t())
            .map_axis(Axis(1), |row| row.fold(0.0_f64, |best, &s| best.max(s))),
        SimilarityAggregation::Centroid => match query_matrix.mean_axis(Axis(0)) {
            Some(mut centroid) => {
                normalize(&mut centroid);
                document_matrix.dot(&centroid)
            }
            None => Array1::zeros(documents.len()),
        },
    };

    similarities.iter().map(|s| s.clamp(0.0, 1.0)).collect()
}
