//! Knowledge corpus index for policy-aware investigations
//!
//! Loads markdown documents once at startup, segments them on headings and
//! answers topic queries with a small lexical ranking. The index is
//! immutable after construction; reloading means restarting the process.

use crate::adapters::FilesystemAdapter;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

/// Results returned per query
pub const DEFAULT_TOP_K: usize = 3;

/// One heading-delimited section of a corpus document
#[derive(Debug, Clone)]
pub struct KnowledgeSection {
    pub doc_id: String,
    pub file_name: String,
    pub section_id: String,
    pub title: String,
    pub body: String,
    heading_tokens: BTreeSet<String>,
    body_tokens: BTreeSet<String>,
}

impl KnowledgeSection {
    /// Stable citation reference, e.g. `incident_playbook#imagepullbackoff_investigation`
    pub fn reference(&self) -> String {
        format!("{}#{}", self.doc_id, self.section_id)
    }
}

/// A ranked query hit
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeHit {
    pub doc_id: String,
    pub section_id: String,
    pub title: String,
    pub body: String,
    pub score: u32,
}

impl KnowledgeHit {
    pub fn reference(&self) -> String {
        format!("{}#{}", self.doc_id, self.section_id)
    }
}

pub struct KnowledgeIndex {
    sections: Vec<KnowledgeSection>,
    document_count: usize,
}

impl KnowledgeIndex {
    /// Load all `*.md` files under `dir`. A missing or empty directory
    /// yields an empty index, not an error.
    pub fn load(dir: &Path, fs: &dyn FilesystemAdapter) -> Result<Self> {
        let files = match fs.list(dir) {
            Ok(files) => files,
            Err(_) => {
                info!(dir = %dir.display(), "knowledge directory missing, starting with empty corpus");
                return Ok(Self::empty());
            }
        };

        let mut documents = Vec::new();
        for path in files {
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let bytes = fs
                .read(&path)
                .with_context(|| format!("reading corpus file {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            documents.push((file_name, String::from_utf8_lossy(&bytes).into_owned()));
        }

        Ok(Self::from_documents(documents))
    }

    pub fn empty() -> Self {
        Self {
            sections: Vec::new(),
            document_count: 0,
        }
    }

    /// Build an index from `(file_name, content)` pairs
    pub fn from_documents(mut documents: Vec<(String, String)>) -> Self {
        // Filename order fixes tie-breaking before any scoring happens.
        documents.sort_by(|a, b| a.0.cmp(&b.0));

        let mut sections = Vec::new();
        for (file_name, content) in &documents {
            let doc_id = file_name.trim_end_matches(".md").to_string();
            for (title, body) in segment(content) {
                let first_sentence = body.split('.').next().unwrap_or("");
                let heading_tokens = tokenize(&title)
                    .chain(tokenize(first_sentence))
                    .collect();
                sections.push(KnowledgeSection {
                    doc_id: doc_id.clone(),
                    file_name: file_name.clone(),
                    section_id: slugify(&title),
                    title: title.clone(),
                    body_tokens: tokenize(&body).collect(),
                    body,
                    heading_tokens,
                });
            }
        }

        info!(
            documents = documents.len(),
            sections = sections.len(),
            "knowledge index built"
        );

        Self {
            document_count: documents.len(),
            sections,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.document_count
    }

    /// True when any section references this citation
    pub fn has_reference(&self, reference: &str) -> bool {
        self.sections
            .iter()
            .any(|s| s.reference() == reference || s.section_id == reference)
    }

    /// Rank sections for a topic and return the top K.
    ///
    /// Weights: exact topic phrase in the heading (3), topic token overlap
    /// with the heading (2 each), topic token overlap with the body (1
    /// each). Ties break by filename, then document order.
    pub fn query(&self, topic: &str, k: usize) -> Vec<KnowledgeHit> {
        let topic_phrase = normalize_phrase(topic);
        let topic_tokens: BTreeSet<String> = tokenize(topic).collect();
        if topic_tokens.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(u32, usize)> = self
            .sections
            .iter()
            .enumerate()
            .filter_map(|(index, section)| {
                let exact = normalize_phrase(&section.title).contains(&topic_phrase);
                let heading_overlap =
                    topic_tokens.intersection(&section.heading_tokens).count() as u32;
                let body_overlap = topic_tokens.intersection(&section.body_tokens).count() as u32;

                let score = u32::from(exact) * 3 + heading_overlap * 2 + body_overlap;
                (score > 0).then_some((score, index))
            })
            .collect();

        scored.sort_by(|(score_a, idx_a), (score_b, idx_b)| {
            score_b
                .cmp(score_a)
                .then_with(|| self.sections[*idx_a].file_name.cmp(&self.sections[*idx_b].file_name))
                .then_with(|| idx_a.cmp(idx_b))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(score, index)| {
                let section = &self.sections[index];
                KnowledgeHit {
                    doc_id: section.doc_id.clone(),
                    section_id: section.section_id.clone(),
                    title: section.title.clone(),
                    body: section.body.clone(),
                    score,
                }
            })
            .collect()
    }
}

/// Split markdown into `(heading, body)` sections. Content before the first
/// heading becomes an `introduction` section.
fn segment(content: &str) -> Vec<(String, String)> {
    let mut sections = Vec::new();
    let mut title = "introduction".to_string();
    let mut body: Vec<&str> = Vec::new();

    for line in content.lines() {
        if let Some(heading) = line.strip_prefix('#') {
            if !body.iter().all(|l| l.trim().is_empty()) {
                sections.push((title.clone(), body.join("\n").trim().to_string()));
            }
            title = heading.trim_start_matches('#').trim().to_string();
            body.clear();
        } else {
            body.push(line);
        }
    }
    if !body.iter().all(|l| l.trim().is_empty()) {
        sections.push((title, body.join("\n").trim().to_string()));
    }

    sections
}

fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn normalize_phrase(text: &str) -> String {
    tokenize(text).collect::<Vec<_>>().join(" ")
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(str::to_lowercase)
}
