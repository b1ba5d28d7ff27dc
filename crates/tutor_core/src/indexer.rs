//! crates/tutor_core/src/indexer.rs
//!
//! Turns an uploaded document into searchable chunks: extraction, chunking,
//! then a delete-then-insert upsert into the section's collection.
//!
//! Vector-store failures never fail the document flow. A document whose chunks
//! could not be indexed is still `Processed`, just with `is_vectorized = false`.

use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::chunker::TextChunker;
use crate::domain::{chunk_id, Document, DocumentProcessing, Role, Section, User};
use crate::error::{CoreError, CoreResult};
use crate::ports::{
    DatabaseService, DeleteSelector, Metadata, MetadataFilter, PortResult, TextExtractor,
    VectorIndex,
};

pub const INDEX_BATCH_SIZE: usize = 100;

/// What an indexing run managed to store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexReport {
    pub chunk_count: usize,
    pub indexed: usize,
    pub failed_batches: usize,
}

impl IndexReport {
    pub fn is_complete(&self) -> bool {
        self.chunk_count > 0 && self.indexed == self.chunk_count
    }
}

pub struct DocumentIndexer {
    db: Arc<dyn DatabaseService>,
    /// `None` when no vector store could be reached at startup.
    index: Option<Arc<dyn VectorIndex>>,
    extractor: Arc<dyn TextExtractor>,
    chunker: TextChunker,
}

impl DocumentIndexer {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        index: Option<Arc<dyn VectorIndex>>,
        extractor: Arc<dyn TextExtractor>,
        chunker: TextChunker,
    ) -> Self {
        Self {
            db,
            index,
            extractor,
            chunker,
        }
    }

    fn chunk_metadata(document: &Document, index: usize) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("document_id".into(), Value::String(document.id.to_string()));
        metadata.insert(
            "filename".into(),
            Value::String(document.original_filename.clone()),
        );
        metadata.insert("chunk_index".into(), Value::from(index));
        metadata.insert(
            "document_type".into(),
            Value::String(document.document_type.as_str().to_string()),
        );
        metadata.insert(
            "section_id".into(),
            Value::String(document.section_id.to_string()),
        );
        metadata
    }

    /// Stores `chunks` for `document` in `collection`. Chunks already indexed
    /// under the same ids are removed first, so re-indexing never duplicates.
    /// Failed batches are logged and counted; only collection setup errors
    /// are returned.
    pub async fn index_document(
        &self,
        index: &dyn VectorIndex,
        collection: &str,
        document: &Document,
        chunks: &[String],
    ) -> PortResult<IndexReport> {
        let mut report = IndexReport {
            chunk_count: chunks.len(),
            ..Default::default()
        };
        if chunks.is_empty() {
            warn!("No chunks to index for document {}", document.id);
            return Ok(report);
        }

        index.get_or_create_collection(collection).await?;

        let ids: Vec<String> = (0..chunks.len()).map(|i| chunk_id(document.id, i)).collect();
        let metadatas: Vec<Metadata> = (0..chunks.len())
            .map(|i| Self::chunk_metadata(document, i))
            .collect();

        match index.existing_ids(collection, &ids).await {
            Ok(existing) if !existing.is_empty() => {
                info!(
                    "Removing {} previously indexed chunks of document {}",
                    existing.len(),
                    document.id
                );
                index.delete(collection, DeleteSelector::Ids(existing)).await?;
            }
            Ok(_) => {}
            Err(e) => warn!("Could not check existing chunks, continuing with insert: {}", e),
        }

        let total_batches = chunks.len().div_ceil(INDEX_BATCH_SIZE);
        for (batch, start) in (0..chunks.len()).step_by(INDEX_BATCH_SIZE).enumerate() {
            let end = (start + INDEX_BATCH_SIZE).min(chunks.len());
            match index
                .upsert(collection, &ids[start..end], &chunks[start..end], &metadatas[start..end])
                .await
            {
                Ok(()) => {
                    report.indexed += end - start;
                    info!(
                        "Indexed batch {}/{} of document {}",
                        batch + 1,
                        total_batches,
                        document.id
                    );
                }
                Err(e) => {
                    report.failed_batches += 1;
                    error!("Failed to index batch {}: {}", batch + 1, e);
                }
            }
        }

        info!(
            "Indexing finished for document {} ({}/{} chunks)",
            document.id, report.indexed, report.chunk_count
        );
        Ok(report)
    }

    /// The document's section, provided `user` manages it. Teachers manage
    /// their own sections; admins manage every section.
    async fn managed_section(&self, user: &User, document: &Document) -> CoreResult<Section> {
        let section = self.db.get_section(document.section_id).await?;
        if section.teacher_id != user.id && user.role != Role::Admin {
            warn!("User {} may not manage document {}", user.id, document.id);
            return Err(CoreError::NotAuthorized);
        }
        Ok(section)
    }

    /// Extracts, chunks and indexes a stored document of `section_id`,
    /// recording each state transition. Extraction failures mark the document
    /// `Error` and are returned as the updated document, not as an error.
    pub async fn process_document(
        &self,
        user: &User,
        section_id: i64,
        document_id: i64,
    ) -> CoreResult<Document> {
        let document = self.db.get_document(document_id).await?;
        if document.section_id != section_id {
            return Err(CoreError::NotFound(format!(
                "Document {} in section {}",
                document_id, section_id
            )));
        }
        let section = self.managed_section(user, &document).await?;

        let document = self
            .db
            .update_document_processing(document_id, DocumentProcessing::Started)
            .await?;

        let extracted_text = match self.extractor.extract(&document).await {
            Ok(text) => text,
            Err(e) => {
                error!("Text extraction failed for document {}: {}", document_id, e);
                let failed = self
                    .db
                    .update_document_processing(
                        document_id,
                        DocumentProcessing::Failed {
                            message: e.to_string(),
                        },
                    )
                    .await?;
                return Ok(failed);
            }
        };

        let mut chunks = self.chunker.chunk(&extracted_text);
        chunks.retain(|chunk| !chunk.trim().is_empty());
        let report = self.index_for_section(&section, &document, &chunks).await;

        let updated = self
            .db
            .update_document_processing(
                document_id,
                DocumentProcessing::Completed {
                    extracted_text,
                    vector_count: report.indexed,
                    is_vectorized: report.is_complete(),
                },
            )
            .await?;
        Ok(updated)
    }

    async fn index_for_section(
        &self,
        section: &Section,
        document: &Document,
        chunks: &[String],
    ) -> IndexReport {
        let (Some(index), Some(collection)) = (&self.index, section.collection_name.as_deref())
        else {
            warn!(
                "Vector store unavailable for section {}, document {} will not be searchable",
                section.id, document.id
            );
            return IndexReport {
                chunk_count: chunks.len(),
                ..Default::default()
            };
        };

        match self.index_document(index.as_ref(), collection, document, chunks).await {
            Ok(report) => report,
            Err(e) => {
                error!("Indexing of document {} failed: {}", document.id, e);
                IndexReport {
                    chunk_count: chunks.len(),
                    ..Default::default()
                }
            }
        }
    }

    /// Deletes a document and its chunks. Only the section's teacher may do
    /// this. Returns the deleted record so the caller can remove the file.
    ///
    /// Chunks are removed by document filter whatever the recorded indexing
    /// state, since a partly indexed document still has chunks stored.
    pub async fn delete_document(&self, user: &User, document_id: i64) -> CoreResult<Document> {
        let document = self.db.get_document(document_id).await?;
        let section = self.db.get_section(document.section_id).await?;
        if section.teacher_id != user.id {
            return Err(CoreError::NotAuthorized);
        }

        if let (Some(index), Some(collection)) = (&self.index, section.collection_name.as_deref()) {
            let selector = DeleteSelector::Filter(MetadataFilter::document(document.id));
            match index.delete(collection, selector).await {
                Ok(()) => info!("Removed chunks of document {}", document.id),
                Err(e) => error!("Failed to remove chunks of document {}: {}", document.id, e),
            }
        }

        self.db.delete_document(document_id).await?;
        info!("Document {} deleted", document_id);
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DocumentStatus, DocumentType};
    use std::path::PathBuf;

    #[test]
    fn metadata_carries_string_ids() {
        let document = Document {
            id: 42,
            section_id: 7,
            original_filename: "cours.pdf".into(),
            file_path: PathBuf::from("/tmp/cours.pdf"),
            document_type: DocumentType::Pdf,
            status: DocumentStatus::Processing,
            extracted_text: None,
            is_vectorized: false,
            vector_count: 0,
            processing_error: None,
        };
        let metadata = DocumentIndexer::chunk_metadata(&document, 3);
        assert_eq!(metadata["document_id"], Value::String("42".into()));
        assert_eq!(metadata["section_id"], Value::String("7".into()));
        assert_eq!(metadata["chunk_index"], Value::from(3));
        assert_eq!(metadata["document_type"], Value::String("pdf".into()));
        assert_eq!(metadata["filename"], Value::String("cours.pdf".into()));
    }

    #[test]
    fn report_completeness() {
        let empty = IndexReport::default();
        assert!(!empty.is_complete());
        let partial = IndexReport {
            chunk_count: 150,
            indexed: 100,
            failed_batches: 1,
        };
        assert!(!partial.is_complete());
        let full = IndexReport {
            chunk_count: 150,
            indexed: 150,
            failed_batches: 0,
        };
        assert!(full.is_complete());
    }
}
