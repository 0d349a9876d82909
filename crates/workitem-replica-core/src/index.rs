//! Full-text index engine over tantivy.
//!
//! Each item is one document with three fields: the numeric id, the folded
//! tokens of its searchable text, and the edge n-grams of those tokens. The
//! n-gram field is what makes `"log"` find `"login"`. Text is split on
//! non-alphanumerics, lowercased and ASCII-folded, so `"Café"` and `"cafe"`
//! are the same token.
//!
//! Multi-token queries intersect: every query token must match some token
//! of the item, exactly or as a prefix. Each exact token scores
//! [`EXACT_SCORE`] on top of its [`PREFIX_SCORE`], so exact hits outrank
//! prefix-only hits; ties go to newer (higher) ids.
//!
//! # Export format
//!
//! The index lives in a RAM directory. It exports as one chunk per file of
//! that directory (base64) plus a manifest:
//!
//! | Key | Contents |
//! |-----|----------|
//! | `files.json` | format version and the list of file chunks |
//! | `meta.json` | tantivy index metadata |
//! | `<segment>.<ext>` | one segment component file each |
//!
//! A snapshot restores only when the manifest and every file it names are
//! present.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::directory::{Directory, RamDirectory};
use tantivy::query::{BooleanQuery, ConstScoreQuery, Occur, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, FAST, INDEXED, STORED,
};
use tantivy::tokenizer::{AsciiFoldingFilter, LowerCaser, SimpleTokenizer, TextAnalyzer, TokenStream};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::models::{IndexedItem, ItemId};
use crate::store::SnapshotEntry;

/// Chunk listing every other chunk of an export.
pub const MANIFEST_KEY: &str = "files.json";

const META_FILE: &str = "meta.json";
const FORMAT_VERSION: u32 = 2;

const TOKENIZER: &str = "folded";
const WRITER_HEAP_BYTES: usize = 50_000_000;
const MAX_PREFIX_CHARS: usize = 32;

pub const EXACT_SCORE: f32 = 2.0;
pub const PREFIX_SCORE: f32 = 1.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    files: Vec<String>,
}

#[derive(Clone, Copy)]
struct Fields {
    id: Field,
    text: Field,
    prefix: Field,
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let indexing = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::Basic),
    );
    let id = builder.add_i64_field("id", INDEXED | STORED | FAST);
    let text = builder.add_text_field("text", indexing.clone());
    let prefix = builder.add_text_field("prefix", indexing);
    (builder.build(), Fields { id, text, prefix })
}

fn build_tokenizer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(AsciiFoldingFilter)
        .build()
}

/// Fold and split text into index tokens, first occurrence order.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut analyzer = build_tokenizer();
    let mut stream = analyzer.token_stream(text);
    let mut seen = BTreeSet::new();
    let mut tokens = Vec::new();
    while stream.advance() {
        let token = &stream.token().text;
        if seen.insert(token.clone()) {
            tokens.push(token.clone());
        }
    }
    tokens
}

fn edge_ngrams(tokens: &[String]) -> String {
    let mut ngrams = String::new();
    for token in tokens {
        let chars: Vec<char> = token.chars().collect();
        for len in 1..=chars.len().min(MAX_PREFIX_CHARS) {
            if !ngrams.is_empty() {
                ngrams.push(' ');
            }
            ngrams.extend(&chars[..len]);
        }
    }
    ngrams
}

/// Prefix-matching inverted index over [`IndexedItem`]s.
///
/// Mutations are staged until [`commit`](Self::commit); searches see the
/// last committed state.
pub struct FuzzyIndex {
    index: Index,
    writer: IndexWriter,
    reader: IndexReader,
    fields: Fields,
}

impl FuzzyIndex {
    /// An empty index in a fresh RAM directory.
    pub fn new() -> Result<Self> {
        let (schema, _) = build_schema();
        Self::from_index(Index::create_in_ram(schema))
    }

    fn from_index(index: Index) -> Result<Self> {
        index.tokenizers().register(TOKENIZER, build_tokenizer());
        let (_, fields) = build_schema();
        let writer: IndexWriter = index
            .writer(WRITER_HEAP_BYTES)
            .context("Failed to create index writer")?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to open index reader")?;
        Ok(Self {
            index,
            writer,
            reader,
            fields,
        })
    }

    /// Committed document count.
    pub fn len(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stage an item. Re-adding an existing id replaces it.
    pub fn add(&mut self, item: &IndexedItem) -> Result<()> {
        self.remove(item.id);
        let tokens = tokenize(&item.searchable_text);
        self.writer.add_document(doc!(
            self.fields.id => item.id,
            self.fields.text => tokens.join(" "),
            self.fields.prefix => edge_ngrams(&tokens),
        ))?;
        Ok(())
    }

    pub fn update(&mut self, item: &IndexedItem) -> Result<()> {
        self.add(item)
    }

    /// Stage the removal of an id. Unknown ids are a no-op.
    pub fn remove(&mut self, id: ItemId) {
        self.writer
            .delete_term(Term::from_field_i64(self.fields.id, id));
    }

    /// Make staged changes searchable.
    pub fn commit(&mut self) -> Result<()> {
        self.writer.commit().context("Failed to commit index")?;
        self.reader.reload().context("Failed to reload index reader")?;
        Ok(())
    }

    /// Ids matching every token of `query`, best first, at most `limit`.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<ItemId>> {
        let terms = tokenize(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let clauses: Vec<(Occur, Box<dyn Query>)> = terms
            .iter()
            .map(|term| {
                let either = BooleanQuery::new(vec![
                    (Occur::Should, self.term_query(self.fields.text, term, EXACT_SCORE)),
                    (Occur::Should, self.term_query(self.fields.prefix, term, PREFIX_SCORE)),
                ]);
                (Occur::Must, Box::new(either) as Box<dyn Query>)
            })
            .collect();
        let query = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let everything = (searcher.num_docs() as usize).max(1);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(everything))?;

        let mut scored = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let Some(id) = doc.get_first(self.fields.id).and_then(|v| v.as_i64()) else {
                continue;
            };
            scored.push((score, id));
        }

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
        Ok(scored.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    fn term_query(&self, field: Field, text: &str, score: f32) -> Box<dyn Query> {
        let term = TermQuery::new(
            Term::from_field_text(field, text),
            IndexRecordOption::Basic,
        );
        Box::new(ConstScoreQuery::new(Box::new(term), score))
    }

    /// Every chunk key the current committed state exports to.
    pub fn export_keys(&self) -> Result<Vec<String>> {
        let mut keys = vec![MANIFEST_KEY.to_string()];
        keys.extend(self.file_keys()?);
        Ok(keys)
    }

    fn file_keys(&self) -> Result<Vec<String>> {
        let directory = self.index.directory();
        let mut files = BTreeSet::from([META_FILE.to_string()]);
        for meta in self.index.searchable_segment_metas()? {
            for path in meta.list_files() {
                if directory.exists(&path)? {
                    files.insert(path.to_string_lossy().into_owned());
                }
            }
        }
        Ok(files.into_iter().collect())
    }

    /// Serialize one export chunk.
    pub fn export_chunk(&self, key: &str) -> Result<String> {
        if key == MANIFEST_KEY {
            let manifest = Manifest {
                version: FORMAT_VERSION,
                files: self.file_keys()?,
            };
            return Ok(serde_json::to_string(&manifest)?);
        }
        let bytes = self
            .index
            .directory()
            .atomic_read(Path::new(key))
            .with_context(|| format!("Unknown index chunk key: {}", key))?;
        Ok(BASE64.encode(bytes))
    }

    /// Rebuild an index from the chunks of an earlier export.
    ///
    /// Fails unless the manifest and every file it lists are present.
    pub fn import(entries: &[SnapshotEntry]) -> Result<Self> {
        let chunks: HashMap<&str, &str> = entries
            .iter()
            .map(|e| (e.key.as_str(), e.value.as_str()))
            .collect();

        let manifest = chunks
            .get(MANIFEST_KEY)
            .context("Index snapshot has no manifest")?;
        let manifest: Manifest =
            serde_json::from_str(manifest).context("Invalid index manifest chunk")?;
        if manifest.version != FORMAT_VERSION {
            bail!("Incompatible index snapshot (v{})", manifest.version);
        }

        let listed: BTreeSet<&str> = manifest.files.iter().map(String::as_str).collect();
        if let Some(stray) = chunks
            .keys()
            .find(|key| **key != MANIFEST_KEY && !listed.contains(*key))
        {
            bail!("Unexpected index chunk: {}", stray);
        }

        let directory = RamDirectory::create();
        for file in &manifest.files {
            let value = chunks
                .get(file.as_str())
                .with_context(|| format!("Index snapshot is missing chunk {}", file))?;
            let bytes = BASE64
                .decode(value)
                .with_context(|| format!("Invalid index chunk {}", file))?;
            directory.atomic_write(Path::new(file), &bytes)?;
        }

        let index = Index::open(directory).context("Invalid index snapshot")?;
        Self::from_index(index)
    }
}
