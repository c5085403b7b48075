//! Corpus records and the curated label reference.
//!
//! The corpus is loaded from JSON Lines in file order; a record's `row_index` is its
//! position among non-blank lines and never changes once vectors exist for it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::EngineError;

/// One labeled product description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    #[serde(skip_deserializing)]
    pub row_index: usize,
    pub text: String,
    /// Classification code, normalized by [`normalize_code`].
    #[serde(alias = "hs_code")]
    pub label: String,
    #[serde(default)]
    pub language: String,
    #[serde(default, alias = "hs_chapter")]
    pub chapter: String,
    #[serde(default, alias = "hs_chapter_name", skip_serializing_if = "Option::is_none")]
    pub chapter_name: Option<String>,
}

/// Ordered, immutable corpus.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    records: Vec<CorpusRecord>,
}

impl Corpus {
    /// Build a corpus from records, assigning `row_index` by position.
    pub fn from_records(records: impl IntoIterator<Item = CorpusRecord>) -> Self {
        let records = records
            .into_iter()
            .enumerate()
            .map(|(i, mut r)| {
                r.row_index = i;
                r.label = normalize_code(&r.label);
                r
            })
            .collect();
        Self { records }
    }

    /// Parse JSON Lines. Blank lines are skipped and do not consume a row index.
    pub fn from_jsonl(input: &str) -> Result<Self> {
        let mut records = Vec::new();
        for (line_no, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: CorpusRecord = serde_json::from_str(line)
                .with_context(|| format!("corpus line {}: malformed record", line_no + 1))?;
            anyhow::ensure!(
                !record.text.trim().is_empty(),
                "corpus line {}: empty text",
                line_no + 1
            );
            records.push(record);
        }
        Ok(Self::from_records(records))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read corpus: {}", path.display()))?;
        let corpus = Self::from_jsonl(&contents)?;
        tracing::info!(rows = corpus.len(), path = %path.display(), "corpus loaded");
        Ok(corpus)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CorpusRecord] {
        &self.records
    }

    /// Record at `row_index`. Out-of-range is a mapping defect, not a miss.
    pub fn get(&self, row_index: usize) -> Result<&CorpusRecord, EngineError> {
        self.records
            .get(row_index)
            .ok_or(EngineError::IndexOutOfRange {
                what: "corpus row",
                index: row_index,
                len: self.records.len(),
            })
    }
}

/// Reference entry for a curated code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeInfo {
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub chapter: String,
}

/// The codes the classifier may ever predict, with their descriptions.
#[derive(Debug, Clone, Default)]
pub struct CuratedLabels {
    codes: BTreeMap<String, CodeInfo>,
}

impl CuratedLabels {
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            codes: codes
                .into_iter()
                .map(|c| (normalize_code(c.as_ref()), CodeInfo::default()))
                .collect(),
        }
    }

    /// Parse a `code -> {desc, chapter}` JSON object.
    pub fn from_json(input: &str) -> Result<Self> {
        let raw: BTreeMap<String, CodeInfo> =
            serde_json::from_str(input).context("failed to parse label reference JSON")?;
        Ok(Self {
            codes: raw
                .into_iter()
                .map(|(code, info)| (normalize_code(&code), info))
                .collect(),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label reference: {}", path.display()))?;
        let labels = Self::from_json(&contents)?;
        tracing::info!(codes = labels.len(), path = %path.display(), "curated labels loaded");
        Ok(labels)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn info(&self, code: &str) -> Option<&CodeInfo> {
        self.codes.get(code)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.codes.keys().map(String::as_str)
    }
}

/// Left-pad an all-digit code to six digits (`"10110"` → `"010110"`).
///
/// Codes that are already six or more digits, or contain non-digits, are only trimmed.
pub fn normalize_code(code: &str) -> String {
    let code = code.trim();
    if !code.is_empty() && code.len() < 6 && code.bytes().all(|b| b.is_ascii_digit()) {
        format!("{code:0>6}")
    } else {
        code.to_string()
    }
}
