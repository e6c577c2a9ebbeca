use std::io::{Read, Write};
use std::sync::Arc;

use tempfile::TempDir;

use quire::index::StoredValue;
use quire::segment::{DocValue, IndexDocument, SegmentBuilder, SegmentReader, delete_documents};
use quire::storage::file::FileStorageConfig;
use quire::storage::memory::MemoryStorage;
use quire::storage::{Storage, StorageConfig, StorageFactory};
use quire::{CodecConfig, SegmentMerger};

fn memory_storage() -> Arc<dyn Storage> {
    Arc::new(MemoryStorage::default())
}

/// Collect `(doc, freq)` for a term of a segment.
fn postings(reader: &SegmentReader, field: &str, text: &str) -> quire::Result<Vec<(u32, u32)>> {
    let Some(info) = reader.terms().get(field, text.as_bytes()) else {
        return Ok(Vec::new());
    };
    let mut postings = reader.postings().postings(info)?;
    let mut docs = Vec::new();
    while let Some(doc) = postings.next_doc()? {
        docs.push((doc, postings.freq()));
    }
    Ok(docs)
}

fn build(
    storage: &Arc<dyn Storage>,
    name: &str,
    docs: Vec<IndexDocument>,
) -> quire::Result<SegmentReader> {
    let mut builder = SegmentBuilder::new(storage.clone(), name, CodecConfig::default())?;
    for doc in docs {
        builder.add_document(doc)?;
    }
    builder.flush()?;
    SegmentReader::open(storage, name)
}

#[test]
fn test_merge_end_to_end_scenario() -> quire::Result<()> {
    let storage = memory_storage();

    // 1. S1: three live documents, "cat" twice in doc 1.
    build(
        &storage,
        "_s1",
        vec![
            IndexDocument::new().with_text("body", ["dog"]),
            IndexDocument::new().with_text("body", ["cat", "and", "cat"]),
            IndexDocument::new().with_text("body", ["bird"]),
        ],
    )?;

    // 2. S2: "cat" in docs 0 and 2, then doc 2 deleted.
    build(
        &storage,
        "_s2",
        vec![
            IndexDocument::new().with_text("body", ["cat", "nap"]),
            IndexDocument::new().with_text("body", ["fish"]),
            IndexDocument::new().with_text("body", ["cat", "cat", "cat"]),
        ],
    )?;
    delete_documents(&storage, "_s2", &[2])?;

    // 3. Merge.
    let readers = vec![
        SegmentReader::open(&storage, "_s1")?,
        SegmentReader::open(&storage, "_s2")?,
    ];
    let merger = SegmentMerger::new(storage.clone(), CodecConfig::default())?;
    let merged = merger.merge(&readers, "_m")?;
    assert_eq!(merged.info.doc_count, 5);
    assert_eq!(merged.doc_bases, vec![0, 3]);

    // 4. Postings of "cat": S1 doc 1 (freq 2) and S2 doc 0 (freq 1, at base 3).
    let reader = SegmentReader::open(&storage, "_m")?;
    assert_eq!(reader.max_doc(), 5);
    assert_eq!(reader.num_docs(), 5);
    assert_eq!(postings(&reader, "body", "cat")?, vec![(1, 2), (3, 1)]);
    assert_eq!(postings(&reader, "body", "fish")?, vec![(4, 1)]);
    Ok(())
}

#[test]
fn test_terms_of_deleted_documents_are_dropped() -> quire::Result<()> {
    let storage = memory_storage();
    build(
        &storage,
        "_a",
        vec![
            IndexDocument::new().with_text("body", ["keep"]),
            IndexDocument::new().with_text("body", ["ghost", "keep"]),
        ],
    )?;
    build(
        &storage,
        "_b",
        vec![IndexDocument::new().with_text("body", ["ghost"])],
    )?;
    delete_documents(&storage, "_a", &[1])?;
    delete_documents(&storage, "_b", &[0])?;

    let readers = vec![
        SegmentReader::open(&storage, "_a")?,
        SegmentReader::open(&storage, "_b")?,
    ];
    let merger = SegmentMerger::new(storage.clone(), CodecConfig::default())?;
    let merged = merger.merge(&readers, "_ab")?;
    assert_eq!(merged.info.doc_count, 1);
    assert_eq!(merged.term_count, 1);

    let reader = SegmentReader::open(&storage, "_ab")?;
    assert!(reader.terms().get("body", b"ghost").is_none());
    assert_eq!(postings(&reader, "body", "keep")?, vec![(0, 1)]);
    Ok(())
}

#[test]
fn test_merged_postings_are_sorted_union() -> quire::Result<()> {
    let storage = memory_storage();
    let config = CodecConfig::default().with_skip_interval(4);

    // 1. Three segments with "x" in every third document; some deleted.
    let mut expected = Vec::new();
    let mut base = 0u32;
    let mut names = Vec::new();
    for segment in 0..3u32 {
        let name = format!("_p{segment}");
        let mut builder = SegmentBuilder::new(storage.clone(), &name, config.clone())?;
        for doc in 0..40u32 {
            let words: Vec<&str> = if doc % 3 == 0 { vec!["x", "y"] } else { vec!["y"] };
            builder.add_document(IndexDocument::new().with_text("body", words))?;
        }
        builder.flush()?;
        let deleted: Vec<u32> = (0..40).filter(|doc| (doc + segment) % 5 == 0).collect();
        delete_documents(&storage, &name, &deleted)?;

        let mut live = 0u32;
        for doc in 0..40u32 {
            if (doc + segment) % 5 == 0 {
                continue;
            }
            if doc % 3 == 0 {
                expected.push((base + live, 1));
            }
            live += 1;
        }
        base += live;
        names.push(name);
    }

    // 2. Merge and compare.
    let readers = names
        .iter()
        .map(|name| SegmentReader::open(&storage, name))
        .collect::<quire::Result<Vec<_>>>()?;
    let merger = SegmentMerger::new(storage.clone(), config)?;
    let merged = merger.merge(&readers, "_p")?;
    assert_eq!(merged.info.doc_count, base);

    let reader = SegmentReader::open(&storage, "_p")?;
    let docs = postings(&reader, "body", "x")?;
    assert!(docs.windows(2).all(|pair| pair[0].0 < pair[1].0));
    assert_eq!(docs, expected);

    // 3. Skip checkpoints: df / 4 of them, and advance agrees with a scan.
    let info = *reader.terms().get("body", b"x").unwrap();
    let mut cursor = reader.postings().postings(&info)?;
    assert_eq!(cursor.num_checkpoints(), (info.doc_freq / 4) as usize);
    let target = expected[expected.len() / 2].0 + 1;
    let scanned = expected.iter().map(|(doc, _)| *doc).find(|doc| *doc >= target);
    assert_eq!(cursor.advance(target)?, scanned);
    Ok(())
}

#[test]
fn test_merge_carries_stored_fields_norms_and_doc_values() -> quire::Result<()> {
    let storage = memory_storage();
    build(
        &storage,
        "_d1",
        vec![
            IndexDocument::new()
                .with_text("title", ["red", "shoe"])
                .with_stored("sku", StoredValue::Text("A-1".to_string()))
                .with_doc_value("price", DocValue::Numeric(1000))
                .with_doc_value("color", DocValue::Sorted(b"red".to_vec())),
            IndexDocument::new()
                .with_text("title", ["old"])
                .with_stored("sku", StoredValue::Text("A-2".to_string()))
                .with_doc_value("price", DocValue::Numeric(3000))
                .with_doc_value("color", DocValue::Sorted(b"beige".to_vec())),
        ],
    )?;
    build(
        &storage,
        "_d2",
        vec![
            IndexDocument::new()
                .with_stored("sku", StoredValue::Int(3))
                .with_doc_value("price", DocValue::Numeric(5000))
                .with_doc_value(
                    "tags",
                    DocValue::SortedSet(vec![b"sale".to_vec(), b"new".to_vec()]),
                ),
            IndexDocument::new()
                .with_text("title", ["blue", "boot", "tall"])
                .with_doc_value("price", DocValue::Numeric(7000)),
        ],
    )?;
    delete_documents(&storage, "_d1", &[1])?;

    let readers = vec![
        SegmentReader::open(&storage, "_d1")?,
        SegmentReader::open(&storage, "_d2")?,
    ];
    let merger = SegmentMerger::new(storage.clone(), CodecConfig::default())?;
    merger.merge(&readers, "_d")?;
    let reader = SegmentReader::open(&storage, "_d")?;
    let fields = reader.field_infos();

    // Stored fields follow the merged field numbering.
    let sku = fields.number_of("sku").unwrap();
    assert_eq!(
        reader.stored_fields().document(0)?,
        vec![(sku, StoredValue::Text("A-1".to_string()))]
    );
    assert_eq!(reader.stored_fields().document(1)?, vec![(sku, StoredValue::Int(3))]);
    assert!(reader.stored_fields().document(2)?.is_empty());

    // Norms: the document without a title gets the default norm.
    let title = fields.number_of("title").unwrap();
    let norms = reader.norms().norms(title).unwrap();
    assert_eq!(norms.len(), 3);
    assert_eq!(norms[1], CodecConfig::default().default_norm);
    assert!(norms[0] > norms[2]);

    // Doc values.
    let doc_values = reader.doc_values().unwrap();
    let price = fields.number_of("price").unwrap();
    assert_eq!(doc_values.numeric(price)?.unwrap(), vec![1000, 5000, 7000]);

    let color = doc_values.sorted(fields.number_of("color").unwrap())?.unwrap();
    assert_eq!(color.value(0), Some(b"red".to_vec()));
    assert_eq!(color.value(1), Some(Vec::new()));
    assert_eq!(color.value_count(), 2);

    let tags = doc_values
        .sorted_set(fields.number_of("tags").unwrap())?
        .unwrap();
    assert!(tags.values(0).is_empty());
    assert_eq!(tags.values(1), vec![b"new".to_vec(), b"sale".to_vec()]);
    Ok(())
}

#[test]
fn test_merge_on_file_storage() -> quire::Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let storage_config = StorageConfig::File(FileStorageConfig::new(temp_dir.path()));
    let storage = StorageFactory::create(storage_config)?;

    for (name, words) in [("_f1", ["alpha", "beta"]), ("_f2", ["beta", "gamma"])] {
        build(
            &storage,
            name,
            vec![IndexDocument::new().with_text_vectors("body", words)],
        )?;
    }
    let readers = vec![
        SegmentReader::open(&storage, "_f1")?,
        SegmentReader::open(&storage, "_f2")?,
    ];
    let merger = SegmentMerger::new(storage.clone(), CodecConfig::default())?;
    let merged = merger.merge(&readers, "_f")?;
    assert!(merged.info.has_vectors);
    for file in &merged.info.files {
        assert!(temp_dir.path().join(file).exists(), "missing {file}");
    }

    let reader = SegmentReader::open(&storage, "_f")?;
    assert_eq!(postings(&reader, "body", "beta")?, vec![(0, 1), (1, 1)]);
    let vectors = reader.term_vectors().unwrap();
    assert_eq!(vectors.get(1)?.len(), 1);
    Ok(())
}

#[test]
fn test_merge_rejects_conflicting_doc_values_types() -> quire::Result<()> {
    let storage = memory_storage();
    build(
        &storage,
        "_c1",
        vec![IndexDocument::new().with_doc_value("f", DocValue::Numeric(1))],
    )?;
    build(
        &storage,
        "_c2",
        vec![IndexDocument::new().with_doc_value("f", DocValue::Binary(vec![1]))],
    )?;
    let readers = vec![
        SegmentReader::open(&storage, "_c1")?,
        SegmentReader::open(&storage, "_c2")?,
    ];
    let merger = SegmentMerger::new(storage.clone(), CodecConfig::default())?;
    assert!(merger.merge(&readers, "_c").is_err());
    assert!(!storage.file_exists("_c.si"));
    Ok(())
}

#[test]
fn test_corrupt_postings_abort_merge_and_remove_output() -> quire::Result<()> {
    let storage = memory_storage();
    let first = build(
        &storage,
        "_a",
        vec![
            IndexDocument::new()
                .with_text_vectors("body", ["ant", "cat"])
                .with_stored("id", StoredValue::Int(0)),
            IndexDocument::new()
                .with_text_vectors("body", ["cat"])
                .with_stored("id", StoredValue::Int(1)),
        ],
    )?;
    build(
        &storage,
        "_b",
        vec![IndexDocument::new().with_text("body", ["cat", "dog"])],
    )?;

    // Rewrite the second "cat" posting of _a (delta 1, freq 1) as delta 0.
    let cat = *first.terms().get("body", b"cat").unwrap();
    drop(first);
    let mut frq = Vec::new();
    storage.open_input("_a.frq")?.read_to_end(&mut frq)?;
    let at = cat.freq_pointer as usize + 1;
    assert_eq!(frq[at - 1], 1);
    assert_eq!(frq[at], 3);
    frq[at] = 1;
    let mut output = storage.create_output("_a.frq")?;
    output.write_all(&frq)?;
    output.close()?;

    let readers = vec![
        SegmentReader::open(&storage, "_a")?,
        SegmentReader::open(&storage, "_b")?,
    ];
    let merger = SegmentMerger::new(storage.clone(), CodecConfig::default())?;
    let err = merger.merge(&readers, "_m").unwrap_err();
    assert!(err.is_corruption(), "unexpected error: {err}");

    // Field infos, stored fields and vectors were written before the
    // postings failed; none of them may survive.
    let left: Vec<String> = storage
        .list_files()?
        .into_iter()
        .filter(|file| file.starts_with("_m"))
        .collect();
    assert!(left.is_empty(), "left behind: {left:?}");
    assert!(storage.file_exists("_a.frq"));
    Ok(())
}
