//! Sparse Search using Tantivy (BM25)
//!
//! Lexical half of hybrid retrieval.

use parking_lot::RwLock;
use std::collections::HashMap;
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, IndexRecordOption, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED, STRING},
    tokenizer::{Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer},
    Index, IndexReader, IndexWriter, TantivyDocument, Term,
};

use askdoc_core::{Document, LexicalIndex};

use crate::RagError;

const TOKENIZER_NAME: &str = "askdoc_text";

/// Sparse search configuration
#[derive(Debug, Clone)]
pub struct SparseConfig {
    /// Apply English stemming
    pub stemming: bool,
    /// Writer heap budget in bytes
    pub writer_memory: usize,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            stemming: true,
            writer_memory: 50_000_000,
        }
    }
}

/// In-RAM BM25 index
pub struct SparseIndex {
    index: Index,
    reader: IndexReader,
    writer: RwLock<IndexWriter>,
    id_field: Field,
    text_field: Field,
    metadata_field: Field,
}

impl SparseIndex {
    pub fn new(config: SparseConfig) -> Result<Self, RagError> {
        let mut schema_builder = Schema::builder();

        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(TOKENIZER_NAME)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let text_field = schema_builder.add_text_field("text", text_options);
        // serialized JSON map, stored only
        let metadata_field = schema_builder.add_text_field("metadata", STORED);

        let schema = schema_builder.build();
        let index = Index::create_in_ram(schema);
        index
            .tokenizers()
            .register(TOKENIZER_NAME, Self::build_tokenizer(&config));

        let reader = index.reader().map_err(|e| RagError::Index(e.to_string()))?;
        let writer = index
            .writer(config.writer_memory)
            .map_err(|e| RagError::Index(e.to_string()))?;

        tracing::debug!(stemming = config.stemming, "Sparse index created");

        Ok(Self {
            index,
            reader,
            writer: RwLock::new(writer),
            id_field,
            text_field,
            metadata_field,
        })
    }

    fn build_tokenizer(config: &SparseConfig) -> TextAnalyzer {
        let base = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(100))
            .filter(LowerCaser);

        if config.stemming {
            base.filter(Stemmer::new(Language::English)).build()
        } else {
            base.build()
        }
    }

    fn commit(&self, writer: &mut IndexWriter) -> Result<(), RagError> {
        writer
            .commit()
            .map_err(|e| RagError::Index(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| RagError::Index(e.to_string()))
    }

    /// Index documents, replacing any with the same id
    pub fn index_documents(&self, documents: &[Document]) -> Result<(), RagError> {
        let mut writer = self.writer.write();

        for doc in documents {
            writer.delete_term(Term::from_field_text(self.id_field, &doc.id));

            let mut tantivy_doc = TantivyDocument::default();
            tantivy_doc.add_text(self.id_field, &doc.id);
            tantivy_doc.add_text(self.text_field, &doc.content);
            if !doc.metadata.is_empty() {
                let metadata = serde_json::to_string(&doc.metadata)
                    .map_err(|e| RagError::Index(e.to_string()))?;
                tantivy_doc.add_text(self.metadata_field, metadata);
            }

            writer
                .add_document(tantivy_doc)
                .map_err(|e| RagError::Index(e.to_string()))?;
        }

        self.commit(&mut writer)
    }

    /// Search using BM25
    ///
    /// Query syntax errors are tolerated: free text from users and models
    /// often contains `:` or unbalanced quotes.
    pub fn search_bm25(&self, query: &str, k: usize) -> Result<Vec<Document>, RagError> {
        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);

        let (query, errors) = query_parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!(errors = errors.len(), "Lenient query parse dropped clauses");
        }

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(k))
            .map_err(|e| RagError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());

        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| RagError::Search(e.to_string()))?;

            let id = Self::text_value(&doc, self.id_field);
            let content = Self::text_value(&doc, self.text_field);
            let metadata: HashMap<String, String> = match doc.get_first(self.metadata_field) {
                Some(OwnedValue::Str(raw)) => serde_json::from_str(raw).unwrap_or_default(),
                _ => HashMap::new(),
            };

            let mut document = Document::new(id, content, score);
            document.metadata = metadata;
            results.push(document);
        }

        Ok(results)
    }

    fn text_value(doc: &TantivyDocument, field: Field) -> String {
        doc.get_first(field)
            .and_then(|v| match v {
                OwnedValue::Str(s) => Some(s.as_str()),
                _ => None,
            })
            .unwrap_or("")
            .to_string()
    }

    /// Delete a document by ID
    pub fn delete_id(&self, id: &str) -> Result<(), RagError> {
        let mut writer = self.writer.write();
        writer.delete_term(Term::from_field_text(self.id_field, id));
        self.commit(&mut writer)
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

impl LexicalIndex for SparseIndex {
    fn search(&self, query: &str, k: usize) -> askdoc_core::Result<Vec<Document>> {
        Ok(self.search_bm25(query, k)?)
    }

    fn insert(&self, documents: &[Document]) -> askdoc_core::Result<()> {
        Ok(self.index_documents(documents)?)
    }

    fn delete(&self, id: &str) -> askdoc_core::Result<()> {
        Ok(self.delete_id(id)?)
    }

    fn len(&self) -> usize {
        self.doc_count() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_docs() -> Vec<Document> {
        vec![
            Document::new("1", "Centrifugal pump seals must be inspected every quarter", 0.0)
                .with_metadata("file", "pump_manual.pdf"),
            Document::new("2", "Submit expense reports before the end of the month", 0.0),
        ]
    }

    #[test]
    fn test_sparse_index_create() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();
        assert_eq!(index.doc_count(), 0);
    }

    #[test]
    fn test_index_and_search() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();
        index.index_documents(&sample_docs()).unwrap();
        assert_eq!(index.doc_count(), 2);

        // stemming matches "inspected" and "seals"
        let results = index.search_bm25("seal inspection pumps", 5).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].id, "1");
        assert!(results[0].score > 0.0);
        assert_eq!(
            results[0].metadata.get("file"),
            Some(&"pump_manual.pdf".to_string())
        );
    }

    #[test]
    fn test_query_syntax_is_tolerated() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();
        index.index_documents(&sample_docs()).unwrap();

        assert!(index.search_bm25("context: \"pump (seals", 5).is_ok());
        assert!(index.search_bm25("", 5).is_ok());
    }

    #[test]
    fn test_reindex_replaces_and_delete() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();
        index.index_documents(&sample_docs()).unwrap();
        index
            .index_documents(&[Document::new("2", "Expense reports are due quarterly", 0.0)])
            .unwrap();
        assert_eq!(index.doc_count(), 2);

        index.delete_id("1").unwrap();
        assert_eq!(LexicalIndex::len(&index), 1);
        assert!(index.search_bm25("pump", 5).unwrap().is_empty());
    }
}
