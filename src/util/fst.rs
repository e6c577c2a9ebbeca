//! Sorted byte-sequence dictionary backed by a finite-state transducer.
//!
//! Each distinct key maps to its ordinal (0-based rank in sorted order).
//! Because ordinals grow with key order, transition outputs along any path
//! are non-decreasing, which lets [`FstDictionary::term`] recover a key from
//! its ordinal by walking the automaton without a reverse index.

use fst::raw::Output;
use fst::{Map, MapBuilder, Streamer};

use crate::error::{QuireError, Result};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{StorageInput, StorageOutput};

/// An immutable ordinal dictionary.
#[derive(Clone)]
pub struct FstDictionary {
    map: Map<Vec<u8>>,
}

impl std::fmt::Debug for FstDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FstDictionary")
            .field("len", &self.len())
            .field("bytes", &self.map.as_fst().as_bytes().len())
            .finish()
    }
}

impl FstDictionary {
    /// Build from strictly increasing keys; the i-th key gets ordinal i.
    pub fn build<I, K>(sorted_keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let mut builder = MapBuilder::memory();
        for (ord, key) in sorted_keys.into_iter().enumerate() {
            builder.insert(key, ord as u64)?;
        }
        let bytes = builder.into_inner()?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Ok(FstDictionary {
            map: Map::new(bytes)?,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.map.as_fst().as_bytes()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Ordinal of `key`, if present.
    pub fn ord(&self, key: &[u8]) -> Option<u64> {
        self.map.get(key)
    }

    /// Key with ordinal `ord`, if in range.
    pub fn term(&self, ord: u64) -> Option<Vec<u8>> {
        if ord >= self.len() as u64 {
            return None;
        }
        let fst = self.map.as_fst();
        let mut node = fst.root();
        let mut acc = Output::zero();
        let mut key = Vec::new();
        loop {
            if node.is_final() && acc.cat(node.final_output()).value() == ord {
                return Some(key);
            }
            let mut next = None;
            for transition in node.transitions() {
                if acc.cat(transition.out).value() <= ord {
                    next = Some(transition);
                } else {
                    break;
                }
            }
            let transition = next?;
            key.push(transition.inp);
            acc = acc.cat(transition.out);
            node = fst.node(transition.addr);
        }
    }

    /// All keys in ordinal order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let mut keys = Vec::with_capacity(self.len());
        let mut stream = self.map.stream();
        while let Some((key, _)) = stream.next() {
            keys.push(key.to_vec());
        }
        keys
    }

    /// Write as a length-prefixed blob.
    pub fn write<W: StorageOutput>(&self, out: &mut StructWriter<W>) -> Result<()> {
        out.write_len_bytes(self.as_bytes())
    }

    /// Read a blob written by [`FstDictionary::write`], checking the key count.
    pub fn read<R: StorageInput>(input: &mut StructReader<R>, expected_len: u64) -> Result<Self> {
        let bytes = input.read_len_bytes()?;
        let dict = Self::from_bytes(bytes)?;
        if dict.len() as u64 != expected_len {
            return Err(QuireError::corruption(format!(
                "FST holds {} keys, metadata says {expected_len}",
                dict.len()
            )));
        }
        Ok(dict)
    }
}
