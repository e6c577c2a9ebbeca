//! Decoding of `.frq`/`.prx` postings with skip-based seeking.

use std::io::Read;
use std::sync::Arc;

use crate::error::{QuireError, Result};
use crate::index::term::TermInfo;
use crate::postings::skip::{SkipEntry, decode_skip_list, find_checkpoint};
use crate::postings::writer::{FREQ_MAGIC, POSTINGS_VERSION, PROX_MAGIC};
use crate::storage::Storage;
use crate::util::varint::VarintCursor;

const HEADER_LENGTH: usize = 8;

/// Both postings streams of a segment, held in memory.
#[derive(Debug, Clone)]
pub struct PostingsReader {
    freq: Arc<[u8]>,
    prox: Arc<[u8]>,
    skip_interval: u32,
}

fn load(storage: &Arc<dyn Storage>, file_name: &str, magic: u32) -> Result<Arc<[u8]>> {
    let mut input = storage.open_input(file_name)?;
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    if bytes.len() < HEADER_LENGTH {
        return Err(QuireError::corruption(format!(
            "{file_name}: too short for a header"
        )));
    }
    let actual = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if actual != magic || version != POSTINGS_VERSION {
        return Err(QuireError::corruption(format!(
            "{file_name}: bad header {actual:#010x} version {version}"
        )));
    }
    // Pointers are absolute, so the header stays in the buffer.
    Ok(bytes.into())
}

impl PostingsReader {
    pub fn open(
        storage: &Arc<dyn Storage>,
        freq_file: &str,
        prox_file: &str,
        skip_interval: u32,
    ) -> Result<Self> {
        if skip_interval == 0 {
            return Err(QuireError::corruption("skip interval of 0"));
        }
        Ok(PostingsReader {
            freq: load(storage, freq_file, FREQ_MAGIC)?,
            prox: load(storage, prox_file, PROX_MAGIC)?,
            skip_interval,
        })
    }

    pub fn skip_interval(&self) -> u32 {
        self.skip_interval
    }

    /// Iterate the postings described by `info`.
    pub fn postings(&self, info: &TermInfo) -> Result<PostingsEnum<'_>> {
        let freq_start = usize::try_from(info.freq_pointer)
            .ok()
            .filter(|&p| p <= self.freq.len())
            .ok_or_else(|| QuireError::corruption("freq pointer past end of file"))?;
        let skip_start = freq_start
            .checked_add(info.skip_offset as usize)
            .ok_or_else(|| QuireError::corruption("skip offset overflow"))?;
        let skip_end = skip_start
            .checked_add(info.skip_length as usize)
            .filter(|&end| end <= self.freq.len())
            .ok_or_else(|| QuireError::corruption("skip trailer past end of file"))?;
        let skips = decode_skip_list(
            &self.freq[skip_start..skip_end],
            info.freq_pointer,
            info.prox_pointer,
        )?;
        let expected = info.doc_freq / self.skip_interval;
        if skips.len() as u32 != expected {
            return Err(QuireError::corruption(format!(
                "term with df {} has {} skip checkpoints, expected {expected}",
                info.doc_freq,
                skips.len()
            )));
        }

        let mut freq = VarintCursor::new(&self.freq[..skip_start]);
        freq.seek(freq_start)?;
        let mut prox = VarintCursor::new(&self.prox);
        prox.seek(info.prox_pointer as usize)?;
        Ok(PostingsEnum {
            freq,
            prox,
            doc_freq: info.doc_freq,
            read: 0,
            doc: None,
            freq_value: 0,
            pending_positions: 0,
            skips,
            skip_interval: self.skip_interval,
        })
    }
}

/// Cursor over one term's postings.
#[derive(Debug)]
pub struct PostingsEnum<'a> {
    freq: VarintCursor<'a>,
    prox: VarintCursor<'a>,
    doc_freq: u32,
    read: u32,
    doc: Option<u32>,
    freq_value: u32,
    pending_positions: u32,
    skips: Vec<SkipEntry>,
    skip_interval: u32,
}

impl PostingsEnum<'_> {
    pub fn doc_freq(&self) -> u32 {
        self.doc_freq
    }

    /// Current document, `None` before the first `next_doc` or after the end.
    pub fn doc(&self) -> Option<u32> {
        self.doc
    }

    /// Frequency of the current document.
    pub fn freq(&self) -> u32 {
        self.freq_value
    }

    pub fn num_checkpoints(&self) -> usize {
        self.skips.len()
    }

    fn skip_pending_positions(&mut self) -> Result<()> {
        while self.pending_positions > 0 {
            self.prox.read_u64()?;
            self.pending_positions -= 1;
        }
        Ok(())
    }

    pub fn next_doc(&mut self) -> Result<Option<u32>> {
        self.skip_pending_positions()?;
        if self.read >= self.doc_freq {
            self.doc = None;
            return Ok(None);
        }
        let code = self.freq.read_u64()?;
        let delta = u32::try_from(code >> 1)
            .map_err(|_| QuireError::corruption("doc delta exceeds 32 bits"))?;
        let freq = if code & 1 == 1 {
            1
        } else {
            self.freq.read_u32()?
        };
        if freq == 0 {
            return Err(QuireError::corruption("posting with frequency 0"));
        }
        let doc = match self.doc {
            Some(last) if delta == 0 => {
                return Err(QuireError::corruption(format!(
                    "doc ids out of order after {last}"
                )));
            }
            Some(last) => last
                .checked_add(delta)
                .ok_or_else(|| QuireError::corruption("doc id overflow"))?,
            None => delta,
        };
        self.doc = Some(doc);
        self.freq_value = freq;
        self.pending_positions = freq;
        self.read += 1;
        Ok(Some(doc))
    }

    /// Positions of the current document. May be called once per document.
    pub fn positions(&mut self) -> Result<Vec<u32>> {
        let mut positions = Vec::with_capacity(self.pending_positions as usize);
        let mut position = 0u32;
        while self.pending_positions > 0 {
            position = position
                .checked_add(self.prox.read_u32()?)
                .ok_or_else(|| QuireError::corruption("position overflow"))?;
            positions.push(position);
            self.pending_positions -= 1;
        }
        Ok(positions)
    }

    /// Jump just past checkpoint `index`; the next `next_doc` returns the
    /// first document after it.
    pub fn skip_to_checkpoint(&mut self, index: usize) -> Result<()> {
        let entry = *self.skips.get(index).ok_or_else(|| {
            QuireError::invalid_argument(format!(
                "checkpoint {index} out of range ({} checkpoints)",
                self.skips.len()
            ))
        })?;
        self.freq.seek(entry.freq_pointer as usize)?;
        self.prox.seek(entry.prox_pointer as usize)?;
        self.doc = Some(entry.doc);
        self.read = (index as u32 + 1) * self.skip_interval;
        self.freq_value = 0;
        self.pending_positions = 0;
        Ok(())
    }

    /// Move to the first document `>= target`.
    pub fn advance(&mut self, target: u32) -> Result<Option<u32>> {
        if let Some(doc) = self.doc {
            if doc >= target && self.freq_value > 0 {
                return Ok(Some(doc));
            }
        }
        if let Some(index) = find_checkpoint(&self.skips, target) {
            let already_read = self.read;
            if (index as u32 + 1) * self.skip_interval > already_read {
                self.skip_to_checkpoint(index)?;
            }
        }
        loop {
            match self.next_doc()? {
                Some(doc) if doc < target => continue,
                other => return Ok(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postings::writer::PostingsWriter;
    use crate::storage::memory::MemoryStorage;

    fn write_term(
        storage: &Arc<dyn Storage>,
        skip_interval: u32,
        docs: &[(u32, Vec<u32>)],
    ) -> TermInfo {
        let mut writer = PostingsWriter::new(storage, "_0.frq", "_0.prx", skip_interval).unwrap();
        // A leading term so pointers are not at the header.
        writer.start_term().unwrap();
        writer.add_doc(0, &[1]).unwrap();
        writer.finish_term().unwrap();

        writer.start_term().unwrap();
        for (doc, positions) in docs {
            writer.add_doc(*doc, positions).unwrap();
        }
        let info = writer.finish_term().unwrap().unwrap();
        writer.close().unwrap();
        info
    }

    #[test]
    fn test_linear_decode() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let docs = vec![(2, vec![0]), (5, vec![1, 4, 9]), (6, vec![3])];
        let info = write_term(&storage, 16, &docs);
        assert_eq!(info.doc_freq, 3);
        assert_eq!(info.skip_length, 0);

        let reader = PostingsReader::open(&storage, "_0.frq", "_0.prx", 16).unwrap();
        let mut postings = reader.postings(&info).unwrap();
        for (doc, positions) in &docs {
            assert_eq!(postings.next_doc().unwrap(), Some(*doc));
            assert_eq!(postings.freq(), positions.len() as u32);
            assert_eq!(&postings.positions().unwrap(), positions);
        }
        assert_eq!(postings.next_doc().unwrap(), None);
    }

    #[test]
    fn test_zero_freq_doc_is_skipped() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let info = write_term(&storage, 16, &[(1, vec![2]), (3, vec![]), (4, vec![0])]);
        assert_eq!(info.doc_freq, 2);
        let reader = PostingsReader::open(&storage, "_0.frq", "_0.prx", 16).unwrap();
        let mut postings = reader.postings(&info).unwrap();
        assert_eq!(postings.next_doc().unwrap(), Some(1));
        assert_eq!(postings.next_doc().unwrap(), Some(4));
    }

    #[test]
    fn test_all_zero_freq_term_is_omitted() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let mut writer = PostingsWriter::new(&storage, "_0.frq", "_0.prx", 4).unwrap();
        writer.start_term().unwrap();
        writer.add_doc(3, &[]).unwrap();
        assert_eq!(writer.finish_term().unwrap(), None);
    }

    #[test]
    fn test_out_of_order_doc_is_corruption() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let mut writer = PostingsWriter::new(&storage, "_0.frq", "_0.prx", 4).unwrap();
        writer.start_term().unwrap();
        writer.add_doc(5, &[0]).unwrap();
        assert!(writer.add_doc(5, &[0]).unwrap_err().is_corruption());
        assert!(writer.add_doc(4, &[0]).unwrap_err().is_corruption());
    }

    #[test]
    fn test_skip_checkpoints_count_and_jump() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let k = 4u32;
        let docs: Vec<(u32, Vec<u32>)> = (0..23u32)
            .map(|i| (i * 3 + 1, (0..(i % 3 + 1)).collect()))
            .collect();
        let info = write_term(&storage, k, &docs);
        assert!(info.skip_length > 0);

        let reader = PostingsReader::open(&storage, "_0.frq", "_0.prx", k).unwrap();
        let postings = reader.postings(&info).unwrap();
        assert_eq!(postings.num_checkpoints(), (docs.len() as u32 / k) as usize);

        for j in 0..postings.num_checkpoints() {
            let mut jumped = reader.postings(&info).unwrap();
            jumped.skip_to_checkpoint(j).unwrap();
            let after_jump = jumped.next_doc().unwrap();

            let mut linear = reader.postings(&info).unwrap();
            for _ in 0..(j as u32 + 1) * k + 1 {
                linear.next_doc().unwrap();
            }
            assert_eq!(after_jump, linear.doc());
            assert_eq!(jumped.positions().unwrap(), linear.positions().unwrap());
        }
    }

    #[test]
    fn test_advance_uses_skips() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let docs: Vec<(u32, Vec<u32>)> = (0..100u32).map(|i| (i * 2, vec![i])).collect();
        let info = write_term(&storage, 8, &docs);
        let reader = PostingsReader::open(&storage, "_0.frq", "_0.prx", 8).unwrap();

        let mut postings = reader.postings(&info).unwrap();
        assert_eq!(postings.advance(37).unwrap(), Some(38));
        assert_eq!(postings.positions().unwrap(), vec![19]);
        assert_eq!(postings.advance(38).unwrap(), Some(38));
        assert_eq!(postings.advance(151).unwrap(), Some(152));
        assert_eq!(postings.next_doc().unwrap(), Some(154));
        assert_eq!(postings.advance(1000).unwrap(), None);
    }
}
