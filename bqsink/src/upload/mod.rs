//! Incremental encoder for the load-job multipart upload body.
//!
//! A load job submission is one `multipart/related` body with two parts: the
//! JSON job metadata and the raw newline-delimited payload. The encoder
//! serializes the metadata once at construction, computes the exact byte
//! length of every region up front, and then serves cursor-based reads of
//! any granularity without ever materializing the whole body.
//!
//! Region boundaries are defined in bytes, not characters: the payload may be
//! non-ASCII data and a bounded read must never mis-split a multi-byte
//! sequence relative to the declared lengths.

use std::io::Read;

use bytes::{Bytes, BytesMut};

use crate::bail;
use crate::clients::models::{
    Job, JobConfiguration, JobConfigurationLoad, JobReference, TableReference, TableSchema,
};
use crate::error::{ErrorKind, SinkResult};

/// Boundary marker separating the parts of the upload body.
pub const UPLOAD_BOUNDARY: &str = "xxx";

/// Source format of the payload part.
pub const LOAD_SOURCE_FORMAT: &str = "NEWLINE_DELIMITED_JSON";

/// Read granularity used when pulling payload bytes from the source.
const SOURCE_READ_CHUNK: usize = 8 * 1024;

/// Content-Type header value for the upload request.
pub fn multipart_content_type() -> String {
    format!("multipart/related; boundary={UPLOAD_BOUNDARY}")
}

/// An incrementally readable multipart upload body.
///
/// The payload source is a forward-only reader (a spooled buffer chunk, a
/// file); its bytes are pulled at most once and cached, so [`UploadBody::rewind`]
/// followed by re-reading reproduces byte-identical output without assuming
/// the source is seekable.
#[derive(Debug)]
pub struct UploadBody<S> {
    head: Bytes,
    tail: Bytes,
    source: S,
    payload_len: u64,
    cached: Vec<u8>,
    cursor: u64,
    eof: bool,
}

impl<S: Read> UploadBody<S> {
    /// Builds an upload body from pre-assembled job metadata and a payload
    /// source of known byte length.
    ///
    /// The metadata JSON is serialized here, exactly once, because the head
    /// region's length depends on it and must be fixed before any partial
    /// read is served.
    pub fn new(metadata: &Job, source: S, payload_len: u64) -> SinkResult<UploadBody<S>> {
        let metadata_json = serde_json::to_string(metadata)?;
        let head = format!(
            "--{UPLOAD_BOUNDARY}\n\
             Content-Type: application/json; charset=UTF-8\n\
             \n\
             {metadata_json}\n\
             --{UPLOAD_BOUNDARY}\n\
             Content-Type: application/octet-stream\n\
             \n"
        );

        Ok(UploadBody {
            head: Bytes::from(head),
            tail: Bytes::from_static(b"--xxx--\n"),
            source,
            payload_len,
            cached: Vec::new(),
            cursor: 0,
            eof: false,
        })
    }

    /// Builds the upload body for one load-job submission.
    ///
    /// `schema` is omitted from the metadata when the destination table
    /// already exists (its live schema takes precedence); `job_reference` is
    /// present when the caller pins a deduplicating job id.
    pub fn for_load(
        table: &TableReference,
        schema: Option<TableSchema>,
        job_reference: Option<JobReference>,
        source: S,
        payload_len: u64,
    ) -> SinkResult<UploadBody<S>> {
        let metadata = Job {
            job_reference,
            configuration: Some(JobConfiguration {
                load: Some(JobConfigurationLoad {
                    source_format: LOAD_SOURCE_FORMAT.to_string(),
                    schema,
                    destination_table: table.clone(),
                    ..Default::default()
                }),
            }),
            status: None,
        };

        UploadBody::new(&metadata, source, payload_len)
    }

    /// Total body length in bytes across all three regions.
    pub fn total_len(&self) -> u64 {
        self.head.len() as u64 + self.payload_len + self.tail.len() as u64
    }

    /// Returns whether the cursor has reached end-of-stream.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Resets the cursor to zero and clears the end-of-stream flag.
    ///
    /// Payload bytes already pulled from the source stay cached.
    pub fn rewind(&mut self) {
        self.cursor = 0;
        self.eof = false;
    }

    /// Reads up to `max_bytes` from the current cursor position, advancing
    /// the cursor by the number of bytes returned.
    ///
    /// With no bound, returns the entire remaining content in one chunk and
    /// marks end-of-stream. A bound of zero returns an empty chunk without
    /// touching the cursor. Reading past end-of-stream returns an empty
    /// chunk.
    pub fn read(&mut self, max_bytes: Option<usize>) -> SinkResult<Bytes> {
        if max_bytes == Some(0) {
            return Ok(Bytes::new());
        }

        let total = self.total_len();
        if self.cursor >= total {
            self.eof = true;
            return Ok(Bytes::new());
        }

        let remaining = total - self.cursor;
        let want = match max_bytes {
            Some(max) => (max as u64).min(remaining),
            None => remaining,
        };
        let want = want as usize;

        let mut out = BytesMut::with_capacity(want);
        while out.len() < want {
            let take = want - out.len();
            let head_len = self.head.len() as u64;
            let payload_end = head_len + self.payload_len;

            if self.cursor < head_len {
                let start = self.cursor as usize;
                let n = take.min(self.head.len() - start);
                out.extend_from_slice(&self.head[start..start + n]);
                self.cursor += n as u64;
            } else if self.cursor < payload_end {
                let offset = (self.cursor - head_len) as usize;
                let n = take.min((payload_end - self.cursor) as usize);
                self.ensure_cached(offset + n)?;
                out.extend_from_slice(&self.cached[offset..offset + n]);
                self.cursor += n as u64;
            } else {
                let offset = (self.cursor - payload_end) as usize;
                let n = take.min(self.tail.len() - offset);
                out.extend_from_slice(&self.tail[offset..offset + n]);
                self.cursor += n as u64;
            }
        }

        if self.cursor >= total {
            self.eof = true;
        }

        Ok(out.freeze())
    }

    /// Turns the body into an iterator of bounded chunks, for streaming the
    /// request without re-buffering.
    pub fn into_chunks(self, chunk_size: usize) -> UploadChunks<S> {
        UploadChunks {
            body: self,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Pulls payload bytes from the source until at least `upto` bytes are
    /// cached. Every source byte is read exactly once.
    fn ensure_cached(&mut self, upto: usize) -> SinkResult<()> {
        let mut buf = [0u8; SOURCE_READ_CHUNK];

        while self.cached.len() < upto {
            let n = self.source.read(&mut buf)?;
            if n == 0 {
                bail!(
                    ErrorKind::InvalidData,
                    "Upload payload ended before its declared length",
                    format!("have {} of {} bytes", self.cached.len(), self.payload_len)
                );
            }

            // Never cache past the declared payload length; the regions after
            // it are positioned by that length.
            let usable = n.min(self.payload_len as usize - self.cached.len());
            self.cached.extend_from_slice(&buf[..usable]);
        }

        Ok(())
    }
}

impl UploadBody<std::io::Cursor<Vec<u8>>> {
    /// Builds an upload body over an in-memory payload.
    pub fn for_load_bytes(
        table: &TableReference,
        schema: Option<TableSchema>,
        job_reference: Option<JobReference>,
        payload: Vec<u8>,
    ) -> SinkResult<UploadBody<std::io::Cursor<Vec<u8>>>> {
        let payload_len = payload.len() as u64;
        UploadBody::for_load(
            table,
            schema,
            job_reference,
            std::io::Cursor::new(payload),
            payload_len,
        )
    }
}

/// Iterator over bounded chunks of an [`UploadBody`].
#[derive(Debug)]
pub struct UploadChunks<S> {
    body: UploadBody<S>,
    chunk_size: usize,
}

impl<S: Read> Iterator for UploadChunks<S> {
    type Item = SinkResult<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.body.is_eof() {
            return None;
        }

        match self.body.read(Some(self.chunk_size)) {
            Ok(chunk) if chunk.is_empty() => None,
            Ok(chunk) => Some(Ok(chunk)),
            Err(err) => Some(Err(err)),
        }
    }
}
