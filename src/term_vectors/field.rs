//! Serialized per-field term vector payload.
//!
//! Layout: `u8 flags`, `vint(term count)`, then per term the bytes
//! prefix-compressed against the previous term, `vint(freq)`, then `freq`
//! position deltas when positions are stored and `freq` offset pairs
//! `vint(start - previous start), vint(end - start)` when offsets are.

use std::collections::BTreeMap;

use crate::error::{QuireError, Result};
use crate::util::varint::{self, VarintCursor};

const FLAG_POSITIONS: u8 = 0x01;
const FLAG_OFFSETS: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermVectorTerm {
    pub term: Vec<u8>,
    pub freq: u32,
    pub positions: Vec<u32>,
    /// `(start, end)` character offsets, one per occurrence.
    pub offsets: Vec<(u32, u32)>,
}

/// All terms of one field of one document, sorted by bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermVectorField {
    pub terms: Vec<TermVectorTerm>,
    pub with_positions: bool,
    pub with_offsets: bool,
}

type Occurrence = (u32, Option<(u32, u32)>);

impl TermVectorField {
    /// Build from `(term, position)` tokens in any order.
    pub fn from_tokens<I, T>(tokens: I, with_positions: bool) -> Self
    where
        I: IntoIterator<Item = (T, u32)>,
        T: AsRef<[u8]>,
    {
        Self::group(
            tokens.into_iter().map(|(term, position)| (term, (position, None))),
            with_positions,
            false,
        )
    }

    /// Build from `(term, position, (start, end))` tokens in any order,
    /// storing offsets.
    pub fn from_tokens_with_offsets<I, T>(tokens: I, with_positions: bool) -> Self
    where
        I: IntoIterator<Item = (T, u32, (u32, u32))>,
        T: AsRef<[u8]>,
    {
        Self::group(
            tokens
                .into_iter()
                .map(|(term, position, offsets)| (term, (position, Some(offsets)))),
            with_positions,
            true,
        )
    }

    fn group<I, T>(tokens: I, with_positions: bool, with_offsets: bool) -> Self
    where
        I: Iterator<Item = (T, Occurrence)>,
        T: AsRef<[u8]>,
    {
        let mut by_term: BTreeMap<Vec<u8>, Vec<Occurrence>> = BTreeMap::new();
        for (term, occurrence) in tokens {
            by_term
                .entry(term.as_ref().to_vec())
                .or_default()
                .push(occurrence);
        }
        let terms = by_term
            .into_iter()
            .map(|(term, mut occurrences)| {
                occurrences.sort_unstable();
                TermVectorTerm {
                    freq: occurrences.len() as u32,
                    positions: if with_positions {
                        occurrences.iter().map(|(position, _)| *position).collect()
                    } else {
                        Vec::new()
                    },
                    offsets: if with_offsets {
                        occurrences.iter().filter_map(|(_, offsets)| *offsets).collect()
                    } else {
                        Vec::new()
                    },
                    term,
                }
            })
            .collect();
        TermVectorField {
            terms,
            with_positions,
            with_offsets,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut flags = 0;
        if self.with_positions {
            flags |= FLAG_POSITIONS;
        }
        if self.with_offsets {
            flags |= FLAG_OFFSETS;
        }
        out.push(flags);
        varint::write_u64(&mut out, self.terms.len() as u64);
        let mut last: &[u8] = &[];
        for (i, entry) in self.terms.iter().enumerate() {
            if i > 0 && entry.term.as_slice() <= last {
                return Err(QuireError::invalid_argument(
                    "term vector terms must be strictly increasing",
                ));
            }
            if entry.freq == 0 {
                return Err(QuireError::invalid_argument("term vector term with freq 0"));
            }
            let prefix = last
                .iter()
                .zip(&entry.term)
                .take_while(|(a, b)| a == b)
                .count();
            varint::write_u64(&mut out, prefix as u64);
            varint::write_u64(&mut out, (entry.term.len() - prefix) as u64);
            out.extend_from_slice(&entry.term[prefix..]);
            varint::write_u64(&mut out, entry.freq as u64);
            if self.with_positions {
                if entry.positions.len() != entry.freq as usize {
                    return Err(QuireError::invalid_argument(format!(
                        "{} positions for freq {}",
                        entry.positions.len(),
                        entry.freq
                    )));
                }
                let mut previous = 0u32;
                for &position in &entry.positions {
                    if position < previous {
                        return Err(QuireError::invalid_argument("positions must not decrease"));
                    }
                    varint::write_u64(&mut out, (position - previous) as u64);
                    previous = position;
                }
            }
            if self.with_offsets {
                encode_offsets(&mut out, entry)?;
            }
            last = &entry.term;
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&flags, rest) = bytes
            .split_first()
            .ok_or_else(|| QuireError::corruption("empty term vector payload"))?;
        if flags & !(FLAG_POSITIONS | FLAG_OFFSETS) != 0 {
            return Err(QuireError::corruption(format!(
                "unknown term vector flags {flags:#04x}"
            )));
        }
        let with_positions = flags & FLAG_POSITIONS != 0;
        let with_offsets = flags & FLAG_OFFSETS != 0;
        let mut cursor = VarintCursor::new(rest);
        let count = cursor.read_u64()? as usize;
        let mut terms: Vec<TermVectorTerm> = Vec::with_capacity(count.min(rest.len()));
        for _ in 0..count {
            let prefix = cursor.read_u64()? as usize;
            let suffix_len = cursor.read_u64()? as usize;
            let previous = terms.last().map_or(&[][..], |t| t.term.as_slice());
            if prefix > previous.len() {
                return Err(QuireError::corruption("term vector prefix too long"));
            }
            let mut term = previous[..prefix].to_vec();
            term.extend_from_slice(cursor.read_bytes(suffix_len)?);
            let freq = cursor.read_u32()?;
            let mut positions = Vec::new();
            if with_positions {
                let mut position = 0u32;
                for _ in 0..freq {
                    position = position
                        .checked_add(cursor.read_u32()?)
                        .ok_or_else(|| QuireError::corruption("position overflow"))?;
                    positions.push(position);
                }
            }
            let mut offsets = Vec::new();
            if with_offsets {
                let mut start = 0u32;
                for _ in 0..freq {
                    start = start
                        .checked_add(cursor.read_u32()?)
                        .ok_or_else(|| QuireError::corruption("offset overflow"))?;
                    let end = start
                        .checked_add(cursor.read_u32()?)
                        .ok_or_else(|| QuireError::corruption("offset overflow"))?;
                    offsets.push((start, end));
                }
            }
            terms.push(TermVectorTerm {
                term,
                freq,
                positions,
                offsets,
            });
        }
        if !cursor.is_empty() {
            return Err(QuireError::corruption("trailing bytes in term vector payload"));
        }
        Ok(TermVectorField {
            terms,
            with_positions,
            with_offsets,
        })
    }
}

fn encode_offsets(out: &mut Vec<u8>, entry: &TermVectorTerm) -> Result<()> {
    if entry.offsets.len() != entry.freq as usize {
        return Err(QuireError::invalid_argument(format!(
            "{} offsets for freq {}",
            entry.offsets.len(),
            entry.freq
        )));
    }
    let mut previous = 0u32;
    for &(start, end) in &entry.offsets {
        if start < previous || end < start {
            return Err(QuireError::invalid_argument(format!(
                "offsets ({start}, {end}) out of order after start {previous}"
            )));
        }
        varint::write_u64(out, (start - previous) as u64);
        varint::write_u64(out, (end - start) as u64);
        previous = start;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tokens_groups_and_sorts() {
        let field = TermVectorField::from_tokens(
            [("the", 0), ("cat", 1), ("the", 2), ("catalog", 3)],
            true,
        );
        let terms: Vec<_> = field.terms.iter().map(|t| t.term.as_slice()).collect();
        assert_eq!(terms, vec![&b"cat"[..], &b"catalog"[..], &b"the"[..]]);
        assert_eq!(field.terms[2].positions, vec![0, 2]);

        let decoded = TermVectorField::decode(&field.encode().unwrap()).unwrap();
        assert_eq!(decoded, field);
    }

    #[test]
    fn test_without_positions() {
        let field = TermVectorField::from_tokens([("a", 0), ("a", 5), ("b", 1)], false);
        assert_eq!(field.terms[0].freq, 2);
        assert!(field.terms[0].positions.is_empty());
        let decoded = TermVectorField::decode(&field.encode().unwrap()).unwrap();
        assert_eq!(decoded, field);
    }

    #[test]
    fn test_unsorted_terms_rejected() {
        let field = TermVectorField {
            terms: vec![
                TermVectorTerm {
                    term: b"b".to_vec(),
                    freq: 1,
                    positions: vec![],
                    offsets: vec![],
                },
                TermVectorTerm {
                    term: b"a".to_vec(),
                    freq: 1,
                    positions: vec![],
                    offsets: vec![],
                },
            ],
            with_positions: false,
            with_offsets: false,
        };
        assert!(field.encode().is_err());
    }

    #[test]
    fn test_offsets_follow_positions() {
        let field = TermVectorField::from_tokens_with_offsets(
            [
                ("quick", 1, (4, 9)),
                ("the", 0, (0, 3)),
                ("the", 4, (31, 34)),
                ("fox", 3, (16, 19)),
            ],
            true,
        );
        assert!(field.with_offsets);
        let the = &field.terms[2];
        assert_eq!(the.positions, vec![0, 4]);
        assert_eq!(the.offsets, vec![(0, 3), (31, 34)]);

        let bytes = field.encode().unwrap();
        assert_eq!(bytes[0], FLAG_POSITIONS | FLAG_OFFSETS);
        let decoded = TermVectorField::decode(&bytes).unwrap();
        assert_eq!(decoded, field);

        // Offsets alone, without positions.
        let field =
            TermVectorField::from_tokens_with_offsets([("a", 0, (2, 2)), ("a", 1, (5, 8))], false);
        assert!(field.terms[0].positions.is_empty());
        let decoded = TermVectorField::decode(&field.encode().unwrap()).unwrap();
        assert_eq!(decoded.terms[0].offsets, vec![(2, 2), (5, 8)]);
    }

    #[test]
    fn test_inverted_offsets_rejected() {
        let mut field = TermVectorField::from_tokens_with_offsets([("a", 0, (4, 6))], true);
        field.terms[0].offsets = vec![(6, 4)];
        assert!(matches!(field.encode(), Err(QuireError::InvalidArgument(_))));
        field.terms[0].offsets.clear();
        assert!(field.encode().is_err());
    }

    #[test]
    fn test_unknown_flags_are_corruption() {
        let mut bytes = TermVectorField::from_tokens([("a", 0)], true).encode().unwrap();
        bytes[0] |= 0x80;
        assert!(TermVectorField::decode(&bytes).unwrap_err().is_corruption());
    }

    #[test]
    fn test_truncated_payload() {
        let field = TermVectorField::from_tokens([("hello", 0)], true);
        let bytes = field.encode().unwrap();
        assert!(TermVectorField::decode(&bytes[..bytes.len() - 2]).is_err());
    }
}
