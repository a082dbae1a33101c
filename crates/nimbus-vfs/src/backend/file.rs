//! Write and read handles on file content.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, ReadBuf};

use nimbus_store::{ObjectReader, ObjectWriter};
use nimbus_types::{ContentHasher, FileDoc};

use super::object::Shared;
use crate::error::{VfsError, VfsResult};
use crate::extract::MetadataExtractor;

/// Everything a write handle accumulates until close.
pub(crate) struct WriteState {
    pub(crate) newdoc: FileDoc,
    /// Current doc when overwriting.
    pub(crate) olddoc: Option<FileDoc>,
    /// Provisional doc persisted for a new file.
    pub(crate) placeholder: Option<FileDoc>,
    /// Whether the file really belongs in the trash.
    pub(crate) truly_trashed: bool,
    pub(crate) object: Box<dyn ObjectWriter>,
    pub(crate) object_name: String,
    pub(crate) hasher: ContentHasher,
    pub(crate) extractor: Option<Box<dyn MetadataExtractor>>,
    pub(crate) extractor_checked: bool,
    pub(crate) written: u64,
    pub(crate) declared_size: Option<u64>,
    pub(crate) max_bytes: Option<u64>,
}

impl WriteState {
    async fn push(&mut self, ctx: &Shared, chunk: &[u8]) -> VfsResult<()> {
        let total = self.written + chunk.len() as u64;
        if self.max_bytes.is_some_and(|max| total > max) {
            return Err(VfsError::FileTooBig);
        }
        if self.declared_size.is_some_and(|declared| total > declared) {
            return Err(VfsError::ContentLengthMismatch);
        }
        self.object.write(chunk).await?;
        self.written = total;
        self.hasher.update(chunk);

        if !self.extractor_checked {
            self.extractor_checked = true;
            self.extractor = ctx.extractors.for_mime(&self.newdoc.mime);
        }
        let failed = match self.extractor.as_mut() {
            Some(ex) => ex.write(chunk).err(),
            None => None,
        };
        if let Some(e) = failed {
            tracing::warn!(file_id = %self.newdoc.id, error = %e, "metadata extraction failed");
            if let Some(ex) = self.extractor.take() {
                ex.abort();
            }
        }
        Ok(())
    }

    /// Drop everything this write produced.
    async fn discard(self, ctx: &Shared) {
        if let Some(ex) = self.extractor {
            ex.abort();
        }
        if let Err(e) = self.object.abort().await {
            tracing::debug!(object = %self.object_name, error = %e, "object abort failed");
        }
        if let Some(p) = &self.placeholder {
            delete_placeholder(ctx, p).await;
        }
    }

    async fn finish(self, ctx: &Shared) -> VfsResult<FileDoc> {
        let WriteState {
            mut newdoc,
            olddoc,
            placeholder,
            truly_trashed,
            object,
            object_name,
            hasher,
            extractor,
            written,
            declared_size,
            ..
        } = self;

        let hash = hasher.finalize();
        let content_check = if declared_size.is_some_and(|d| d != written) {
            Err(VfsError::ContentLengthMismatch)
        } else if newdoc.content_hash.as_ref().is_some_and(|h| *h != hash) {
            Err(VfsError::InvalidHash)
        } else {
            Ok(())
        };
        if let Err(e) = content_check {
            if let Some(ex) = extractor {
                ex.abort();
            }
            if let Err(abort) = object.abort().await {
                tracing::warn!(object = %object_name, error = %abort, "could not abort rejected content");
            }
            if let Some(p) = &placeholder {
                delete_placeholder(ctx, p).await;
            }
            return Err(e);
        }

        if let Err(e) = object.commit().await {
            if let Some(p) = &placeholder {
                delete_placeholder(ctx, p).await;
            }
            return Err(e.into());
        }

        if let Some(ex) = extractor {
            match ex.result() {
                Ok(meta) => newdoc.metadata.extend(meta),
                Err(e) => tracing::warn!(file_id = %newdoc.id, error = %e, "metadata extraction failed"),
            }
        }
        newdoc.size = written;
        newdoc.content_hash = Some(hash);
        newdoc.trashed = truly_trashed;

        match commit_doc(ctx, newdoc, olddoc.as_ref(), placeholder.as_ref()).await {
            Ok(doc) => {
                tracing::debug!(file_id = %doc.id, size = doc.size, object = %object_name, "write committed");
                Ok(doc)
            }
            Err(e) => {
                if let Err(cleanup) = ctx.delete_objects(std::slice::from_ref(&object_name)).await {
                    tracing::warn!(object = %object_name, error = %cleanup, "could not remove uncommitted content");
                }
                if let Some(p) = &placeholder
                    && !e.is_index_error()
                {
                    delete_placeholder(ctx, p).await;
                }
                Err(e)
            }
        }
    }
}

/// Replace the previous doc with `newdoc` under the write lock.
async fn commit_doc(
    ctx: &Shared,
    mut newdoc: FileDoc,
    olddoc: Option<&FileDoc>,
    placeholder: Option<&FileDoc>,
) -> VfsResult<FileDoc> {
    let _guard = ctx.lock.write().await?;
    let before = ctx.indexer.disk_usage().await?;
    let Some(prev) = placeholder.or(olddoc) else {
        return Err(VfsError::other("write handle has no document to replace"));
    };

    let mut superseded = olddoc.cloned();
    match ctx.indexer.update_file_doc(prev, &mut newdoc).await {
        Ok(()) => {}
        Err(VfsError::Conflict(_)) => {
            // Someone changed the doc meanwhile: keep their metadata and
            // only swap the content fields.
            let current = ctx.indexer.file_by_id(&newdoc.id).await?;
            let mut narrowed = current.clone();
            narrowed.size = newdoc.size;
            narrowed.content_hash = newdoc.content_hash.clone();
            narrowed.internal_vfs_id = newdoc.internal_vfs_id.clone();
            narrowed.mime = newdoc.mime.clone();
            narrowed.class = newdoc.class.clone();
            narrowed.metadata = newdoc.metadata.clone();
            narrowed.updated_at = newdoc.updated_at.max(current.created_at);
            if placeholder.is_some() {
                narrowed.trashed = newdoc.trashed;
            }
            ctx.indexer.update_file_doc(&current, &mut narrowed).await?;
            tracing::debug!(file_id = %current.id, "write committed after conflict retry");
            if olddoc.is_some() {
                superseded = Some(current);
            }
            newdoc = narrowed;
        }
        Err(e) => return Err(e),
    }

    if let Some(old) = superseded
        && old.internal_vfs_id != newdoc.internal_vfs_id
        && let Err(e) = ctx.supersede(&old).await
    {
        tracing::warn!(file_id = %old.id, error = %e, "could not retire previous content");
    }

    let after = ctx.indexer.disk_usage().await?;
    ctx.alert_on_crossing(before, after);
    Ok(newdoc)
}

async fn delete_placeholder(ctx: &Shared, placeholder: &FileDoc) {
    if let Err(e) = ctx.indexer.delete_file_doc(placeholder).await {
        tracing::warn!(file_id = %placeholder.id, error = %e, "could not remove placeholder");
    }
}

/// Write handle on new file content.
///
/// Content is committed by [`close`](Self::close). A handle dropped without
/// close discards what it wrote in a background task.
pub struct FileWriter {
    ctx: Arc<Shared>,
    state: Option<WriteState>,
}

impl FileWriter {
    pub(crate) fn new(ctx: Arc<Shared>, state: WriteState) -> Self {
        Self {
            ctx,
            state: Some(state),
        }
    }

    /// The document being written, until close.
    pub fn doc(&self) -> Option<&FileDoc> {
        self.state.as_ref().map(|s| &s.newdoc)
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.state.as_ref().map(|s| s.written).unwrap_or(0)
    }

    /// Append a chunk. On error the handle is discarded.
    pub async fn write(&mut self, chunk: &[u8]) -> VfsResult<()> {
        let Some(state) = self.state.as_mut() else {
            return Err(VfsError::other("write handle is closed"));
        };
        match state.push(&self.ctx, chunk).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(state) = self.state.take() {
                    state.discard(&self.ctx).await;
                }
                Err(e)
            }
        }
    }

    /// Copy a whole reader into the handle.
    pub async fn write_from<R: AsyncRead + Unpin>(&mut self, mut reader: R) -> VfsResult<u64> {
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            self.write(&buf[..n]).await?;
            total += n as u64;
        }
    }

    /// Check, commit and index the content.
    pub async fn close(mut self) -> VfsResult<FileDoc> {
        let Some(state) = self.state.take() else {
            return Err(VfsError::other("write handle is closed"));
        };
        state.finish(&self.ctx).await
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        tracing::debug!(file_id = %state.newdoc.id, "write handle dropped without close");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let ctx = Arc::clone(&self.ctx);
            handle.spawn(async move { state.discard(&ctx).await });
        }
    }
}

/// Seekable read handle on file content.
pub struct FileReader {
    inner: Box<dyn ObjectReader>,
    size: u64,
}

impl FileReader {
    pub(crate) fn new(inner: Box<dyn ObjectReader>, size: u64) -> Self {
        Self { inner, size }
    }

    /// Size recorded in the index.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the remaining content.
    pub async fn read_all(mut self) -> VfsResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size as usize);
        self.inner.read_to_end(&mut out).await?;
        Ok(out)
    }
}

impl AsyncRead for FileReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_read(cx, buf)
    }
}

impl AsyncSeek for FileReader {
    fn start_seek(mut self: Pin<&mut Self>, position: io::SeekFrom) -> io::Result<()> {
        Pin::new(&mut *self.inner).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut *self.inner).poll_complete(cx)
    }
}
