//! Re-encodes doc values columns over the live documents of merged segments.

use std::collections::BTreeSet;

use log::debug;

use crate::doc_values::{DocValuesReader, DocValuesWriter};
use crate::error::Result;
use crate::index::field_infos::DocValuesType;
use crate::index::live_docs::DocMap;

/// One input segment's view of the field being merged.
#[derive(Debug, Clone, Copy)]
pub struct DocValuesSource<'a> {
    pub doc_values: Option<&'a DocValuesReader>,
    /// The field's number in this segment, if the segment has it.
    pub field: Option<u32>,
    pub doc_map: &'a DocMap,
}

impl DocValuesSource<'_> {
    fn column(&self) -> Option<(&DocValuesReader, u32)> {
        Some((self.doc_values?, self.field?))
    }

    fn live_docs(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.doc_map.max_doc()).filter(|&doc| self.doc_map.get(doc).is_some())
    }
}

/// Maps each segment's dictionary ordinals onto one merged, sorted
/// dictionary holding only values still referenced by live documents.
#[derive(Debug, Clone, Default)]
pub struct OrdinalMap {
    keys: Vec<Vec<u8>>,
    segment_ords: Vec<Vec<Option<u64>>>,
}

impl OrdinalMap {
    /// `segments[i]` is segment i's dictionary and, per ordinal, whether a
    /// live document uses it.
    pub fn build(segments: &[(Vec<Vec<u8>>, Vec<bool>)]) -> Self {
        let merged: BTreeSet<&[u8]> = segments
            .iter()
            .flat_map(|(keys, used)| {
                keys.iter()
                    .zip(used)
                    .filter(|(_, used)| **used)
                    .map(|(key, _)| key.as_slice())
            })
            .collect();
        let keys: Vec<Vec<u8>> = merged.into_iter().map(<[u8]>::to_vec).collect();

        let segment_ords = segments
            .iter()
            .map(|(segment_keys, used)| {
                segment_keys
                    .iter()
                    .zip(used)
                    .map(|(key, used)| {
                        if !*used {
                            return None;
                        }
                        keys.binary_search(key).ok().map(|ord| ord as u64)
                    })
                    .collect()
            })
            .collect();
        OrdinalMap { keys, segment_ords }
    }

    /// The merged dictionary in ordinal order.
    pub fn keys(&self) -> &[Vec<u8>] {
        &self.keys
    }

    pub fn global_ord(&self, segment: usize, ord: u64) -> Option<u64> {
        self.segment_ords
            .get(segment)
            .and_then(|ords| ords.get(ord as usize).copied().flatten())
    }
}

/// Writes one merged column per doc values field.
#[derive(Debug)]
pub struct DocValuesMerger<'a> {
    sources: &'a [DocValuesSource<'a>],
    merged_docs: usize,
}

impl<'a> DocValuesMerger<'a> {
    pub fn new(sources: &'a [DocValuesSource<'a>]) -> Self {
        let merged_docs = sources
            .iter()
            .map(|source| source.doc_map.live_count() as usize)
            .sum();
        DocValuesMerger {
            sources,
            merged_docs,
        }
    }

    pub fn merge_field(
        &self,
        writer: &mut DocValuesWriter,
        field: u32,
        doc_values_type: DocValuesType,
    ) -> Result<()> {
        match doc_values_type {
            DocValuesType::Numeric => {
                let values = self.merge_numeric()?;
                let strategy = writer.add_numeric(field, &values)?;
                debug!("merged numeric field {field} as {}", strategy.name());
                Ok(())
            }
            DocValuesType::Binary => writer.add_binary(field, &self.merge_binary()?),
            DocValuesType::Sorted => {
                let (map, ords) = self.merge_sorted()?;
                let keys = map.keys().iter().map(Vec::as_slice).collect();
                writer.add_sorted_ords(field, keys, ords)
            }
            DocValuesType::SortedSet => {
                let (map, ords) = self.merge_sorted_set()?;
                writer.add_sorted_set_ords(field, map.keys(), &ords)
            }
        }
    }

    /// Live documents' values in merged order; 0 where a segment lacks the
    /// field.
    pub fn merge_numeric(&self) -> Result<Vec<i64>> {
        let mut merged = Vec::with_capacity(self.merged_docs);
        for source in self.sources {
            let values = match source.column() {
                Some((reader, field)) => reader.numeric(field)?,
                None => None,
            };
            for doc in source.live_docs() {
                let value = values
                    .as_ref()
                    .and_then(|values| values.get(doc as usize).copied());
                merged.push(value.unwrap_or(0));
            }
        }
        Ok(merged)
    }

    /// Live documents' payloads in merged order; empty where a segment
    /// lacks the field.
    pub fn merge_binary(&self) -> Result<Vec<Vec<u8>>> {
        let mut merged = Vec::with_capacity(self.merged_docs);
        for source in self.sources {
            let mut values = match source.column() {
                Some((reader, field)) => reader.binary(field)?,
                None => None,
            };
            for doc in source.live_docs() {
                let value = values
                    .as_mut()
                    .and_then(|values| values.get_mut(doc as usize))
                    .map(std::mem::take);
                merged.push(value.unwrap_or_default());
            }
        }
        Ok(merged)
    }

    /// Merged dictionary and per-document ordinals, `-1` where a segment
    /// lacks the field.
    pub fn merge_sorted(&self) -> Result<(OrdinalMap, Vec<i64>)> {
        let mut columns = Vec::with_capacity(self.sources.len());
        let mut dictionaries = Vec::with_capacity(self.sources.len());
        for source in self.sources {
            let column = match source.column() {
                Some((reader, field)) => reader.sorted(field)?,
                None => None,
            };
            let entry = match &column {
                Some(column) => {
                    let mut used = vec![false; column.value_count()];
                    for doc in source.live_docs() {
                        if let Some(ord) = column.ord(doc) {
                            used[ord as usize] = true;
                        }
                    }
                    (column.dictionary().keys(), used)
                }
                None => (Vec::new(), Vec::new()),
            };
            dictionaries.push(entry);
            columns.push(column);
        }

        let map = OrdinalMap::build(&dictionaries);
        let mut ords = Vec::with_capacity(self.merged_docs);
        for (segment, (source, column)) in self.sources.iter().zip(&columns).enumerate() {
            for doc in source.live_docs() {
                let ord = column
                    .as_ref()
                    .and_then(|column| column.ord(doc))
                    .and_then(|ord| map.global_ord(segment, ord));
                ords.push(ord.map_or(-1, |ord| ord as i64));
            }
        }
        Ok((map, ords))
    }

    /// Merged dictionary and per-document ordinal sets.
    pub fn merge_sorted_set(&self) -> Result<(OrdinalMap, Vec<Vec<u64>>)> {
        let mut columns = Vec::with_capacity(self.sources.len());
        let mut dictionaries = Vec::with_capacity(self.sources.len());
        for source in self.sources {
            let column = match source.column() {
                Some((reader, field)) => reader.sorted_set(field)?,
                None => None,
            };
            let entry = match &column {
                Some(column) => {
                    let mut used = vec![false; column.value_count()];
                    for doc in source.live_docs() {
                        for &ord in column.ords(doc) {
                            used[ord as usize] = true;
                        }
                    }
                    (column.dictionary().keys(), used)
                }
                None => (Vec::new(), Vec::new()),
            };
            dictionaries.push(entry);
            columns.push(column);
        }

        let map = OrdinalMap::build(&dictionaries);
        let mut ords = Vec::with_capacity(self.merged_docs);
        for (segment, (source, column)) in self.sources.iter().zip(&columns).enumerate() {
            for doc in source.live_docs() {
                let doc_ords = match column {
                    Some(column) => column
                        .ords(doc)
                        .iter()
                        .filter_map(|&ord| map.global_ord(segment, ord))
                        .collect(),
                    None => Vec::new(),
                };
                ords.push(doc_ords);
            }
        }
        Ok((map, ords))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::CodecConfig;
    use crate::index::live_docs::LiveDocs;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_ordinal_map_skips_unused_values() {
        let map = OrdinalMap::build(&[
            (vec![b"b".to_vec(), b"d".to_vec()], vec![true, false]),
            (vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()], vec![true, true, true]),
        ]);
        assert_eq!(map.keys(), &[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(map.global_ord(0, 0), Some(1));
        assert_eq!(map.global_ord(0, 1), None);
        assert_eq!(map.global_ord(1, 2), Some(2));
    }

    fn write_segment(
        storage: &Arc<dyn Storage>,
        name: &str,
        sorted: &[Option<&[u8]>],
        numbers: &[i64],
    ) -> DocValuesReader {
        let dvm = format!("{name}.dvm");
        let dvd = format!("{name}.dvd");
        let mut writer = DocValuesWriter::new(
            storage,
            &dvm,
            &dvd,
            numbers.len() as u32,
            CodecConfig::default(),
        )
        .unwrap();
        writer.add_sorted(0, sorted).unwrap();
        writer.add_numeric(1, numbers).unwrap();
        writer.finish().unwrap();
        DocValuesReader::open(storage, &dvm, &dvd, numbers.len() as u32).unwrap()
    }

    #[test]
    fn test_merge_sorted_and_numeric() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let first = write_segment(
            &storage,
            "a",
            &[Some(&b"red"[..]), Some(&b"zebra"[..]), Some(&b"blue"[..])],
            &[5, 6, 7],
        );
        let second = write_segment(&storage, "b", &[Some(&b"green"[..]), Some(&b"red"[..])], &[8, 9]);

        let mut live = LiveDocs::new(3);
        live.delete(1).unwrap();
        let map_a = DocMap::new(3, Some(&live));
        let map_b = DocMap::new(2, None);
        let map_c = DocMap::new(1, None);
        let sources = [
            DocValuesSource {
                doc_values: Some(&first),
                field: Some(0),
                doc_map: &map_a,
            },
            DocValuesSource {
                doc_values: Some(&second),
                field: Some(0),
                doc_map: &map_b,
            },
            DocValuesSource {
                doc_values: None,
                field: None,
                doc_map: &map_c,
            },
        ];
        let merger = DocValuesMerger::new(&sources);

        let (map, ords) = merger.merge_sorted().unwrap();
        // "zebra" only appeared in a deleted document.
        assert_eq!(
            map.keys(),
            &[b"blue".to_vec(), b"green".to_vec(), b"red".to_vec()]
        );
        assert_eq!(ords, vec![2, 0, 1, 2, -1]);

        let numeric_sources: Vec<_> = sources
            .iter()
            .map(|source| DocValuesSource {
                field: source.field.map(|_| 1),
                ..*source
            })
            .collect();
        let merger = DocValuesMerger::new(&numeric_sources);
        assert_eq!(merger.merge_numeric().unwrap(), vec![5, 7, 8, 9, 0]);
    }
}
