use std::sync::Arc;

use chunk_store::{ChunkCompression, ChunkEngine, Config, DType, MemoryProvider, SampleCompression, Selection};

fn engine() -> ChunkEngine {
    ChunkEngine::new(Arc::new(MemoryProvider::new()), Config::default())
}

/// Appends samples of growing shape to an uncompressed tensor and reads
/// them back by index, checking both the bytes and the running shape
/// interval stay correct as the tensor grows.
#[test]
fn test_append_variable_shapes_and_read_back() {
    let mut engine = engine();
    engine
        .create_tensor(
            "images",
            DType::U8,
            SampleCompression::None,
            ChunkCompression::None,
            Some(16 * 1024 * 1024),
        )
        .unwrap();

    for i in 1u32..=30 {
        let buf = vec![i as u8; (i * i) as usize];
        engine.append("images", &buf, &[i, i]).unwrap();
    }

    assert_eq!(engine.num_samples("images").unwrap(), 30);
    assert_eq!(
        engine.shape_interval("images").unwrap(),
        (vec![1, 1], vec![30, 30])
    );

    for i in [0u32, 14, 29] {
        let samples = engine
            .read("images", Selection::Index(i as i64))
            .unwrap();
        let n = i + 1;
        assert_eq!(samples[0].shape, vec![n, n]);
        assert_eq!(samples[0].bytes, vec![n as u8; (n * n) as usize]);
    }
}

/// Negative indices must resolve the same way Python's negative indexing
/// does: `-1` is the last sample, `-30` is the first.
#[test]
fn test_negative_index_counts_from_the_end() {
    let mut engine = engine();
    engine
        .create_tensor(
            "t",
            DType::U8,
            SampleCompression::None,
            ChunkCompression::None,
            None,
        )
        .unwrap();
    for i in 0u8..10 {
        engine.append("t", &[i], &[1]).unwrap();
    }

    assert_eq!(engine.read("t", Selection::Index(-1)).unwrap()[0].bytes, vec![9]);
    assert_eq!(engine.read("t", Selection::Index(-10)).unwrap()[0].bytes, vec![0]);
}
