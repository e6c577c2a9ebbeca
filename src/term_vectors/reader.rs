use std::io::Read;
use std::sync::Arc;

use crate::error::{QuireError, Result};
use crate::index::segment_info::{
    VECTORS_DOCUMENTS_EXTENSION, VECTORS_FIELDS_EXTENSION, VECTORS_INDEX_EXTENSION,
    segment_file_name,
};
use crate::storage::Storage;
use crate::term_vectors::{TVX_ENTRY_LENGTH, VECTORS_FORMAT_VERSION, VECTORS_HEADER_LENGTH};
use crate::util::varint::VarintCursor;

/// Random access to the term vectors of one doc store.
#[derive(Debug, Clone)]
pub struct TermVectorsReader {
    tvx: Arc<[u8]>,
    tvd: Arc<[u8]>,
    tvf: Arc<[u8]>,
    num_docs: u32,
}

fn load(storage: &Arc<dyn Storage>, file_name: &str) -> Result<Arc<[u8]>> {
    let mut input = storage.open_input(file_name)?;
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    if (bytes.len() as u64) < VECTORS_HEADER_LENGTH {
        return Err(QuireError::corruption(format!(
            "{file_name}: too short for a header"
        )));
    }
    let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if version != VECTORS_FORMAT_VERSION {
        return Err(QuireError::corruption(format!(
            "{file_name}: unsupported term vectors version {version}"
        )));
    }
    Ok(bytes.into())
}

fn read_pointer(bytes: &[u8], at: usize) -> Result<u64> {
    bytes
        .get(at..at + 8)
        .and_then(|slice| slice.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| QuireError::corruption("tvx entry past end of file"))
}

impl TermVectorsReader {
    /// Open the vectors of `store_segment`. A store without vector files is
    /// valid and yields `None`.
    pub fn open(
        storage: &Arc<dyn Storage>,
        store_segment: &str,
        num_docs: u32,
    ) -> Result<Option<Self>> {
        let tvx_name = segment_file_name(store_segment, VECTORS_INDEX_EXTENSION);
        if !storage.file_exists(&tvx_name) {
            return Ok(None);
        }
        let tvx = load(storage, &tvx_name)?;
        let expected = VECTORS_HEADER_LENGTH + TVX_ENTRY_LENGTH * num_docs as u64;
        if tvx.len() as u64 != expected {
            return Err(QuireError::corruption(format!(
                "{tvx_name} is {} bytes, expected {expected} for {num_docs} documents",
                tvx.len()
            )));
        }
        let tvd = load(
            storage,
            &segment_file_name(store_segment, VECTORS_DOCUMENTS_EXTENSION),
        )?;
        let tvf = load(
            storage,
            &segment_file_name(store_segment, VECTORS_FIELDS_EXTENSION),
        )?;
        Ok(Some(TermVectorsReader {
            tvx,
            tvd,
            tvf,
            num_docs,
        }))
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    fn pointers(&self, doc: u32) -> Result<(u64, u64)> {
        let at = (VECTORS_HEADER_LENGTH + TVX_ENTRY_LENGTH * doc as u64) as usize;
        Ok((read_pointer(&self.tvx, at)?, read_pointer(&self.tvx, at + 8)?))
    }

    /// The `(field number, payload)` pairs of `doc`, in the order written.
    pub fn get(&self, doc: u32) -> Result<Vec<(u32, Vec<u8>)>> {
        if doc >= self.num_docs {
            return Err(QuireError::index(format!(
                "document {doc} out of range for {} documents",
                self.num_docs
            )));
        }
        let (tvd_pointer, tvf_start) = self.pointers(doc)?;
        // A document's last field runs to the next document's fields.
        let tvf_end = if doc + 1 < self.num_docs {
            self.pointers(doc + 1)?.1
        } else {
            self.tvf.len() as u64
        };
        if tvf_start > tvf_end || tvf_end > self.tvf.len() as u64 {
            return Err(QuireError::corruption(format!(
                "tvf range {tvf_start}..{tvf_end} of document {doc} is invalid"
            )));
        }

        let mut cursor = VarintCursor::new(&self.tvd);
        cursor.seek(tvd_pointer as usize)?;
        let count = cursor.read_u64()? as usize;
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut numbers = Vec::with_capacity(count.min(self.tvd.len()));
        for _ in 0..count {
            numbers.push(cursor.read_u32()?);
        }
        let mut starts = Vec::with_capacity(numbers.len());
        let mut pointer = tvf_start;
        starts.push(pointer);
        for _ in 1..count {
            pointer = pointer
                .checked_add(cursor.read_u64()?)
                .ok_or_else(|| QuireError::corruption("tvf pointer overflow"))?;
            starts.push(pointer);
        }
        if pointer > tvf_end {
            return Err(QuireError::corruption(format!(
                "field pointers of document {doc} run past its tvf range"
            )));
        }

        let mut fields = Vec::with_capacity(count);
        for (i, number) in numbers.into_iter().enumerate() {
            let start = starts[i] as usize;
            let end = starts.get(i + 1).copied().unwrap_or(tvf_end) as usize;
            fields.push((number, self.tvf[start..end].to_vec()));
        }
        Ok(fields)
    }
}
