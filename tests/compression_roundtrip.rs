use std::sync::Arc;

use chunk_store::{
    ChunkCompression, ChunkEngine, Config, DType, MemoryProvider, Provider, SampleCompression, Selection,
};

fn engine() -> ChunkEngine {
    ChunkEngine::new(Arc::new(MemoryProvider::new()), Config::default())
}

/// Grayscale samples stored under PNG sample-compression must decode back
/// to their original bytes bit-for-bit.
#[test]
fn test_png_sample_compression_round_trips_grayscale_images() {
    let mut engine = engine();
    engine
        .create_tensor("frames", DType::U8, SampleCompression::Png, ChunkCompression::None, None)
        .unwrap();

    let shape = [8u32, 8];
    let raw: Vec<u8> = (0..64).collect();
    engine.append("frames", &raw, &shape).unwrap();

    let decoded = engine.read("frames", Selection::Index(0)).unwrap();
    assert_eq!(decoded[0].bytes, raw);
    assert_eq!(decoded[0].shape, vec![8, 8]);
}

/// Chunk-level LZ4 compression is transparent to the sample API: flushing
/// forces every chunk through compress/decompress on its way to storage,
/// and a freshly loaded engine must still read back the original bytes.
#[test]
fn test_lz4_chunk_compression_is_transparent_to_reads() {
    let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
    let mut engine = ChunkEngine::new(provider.clone(), Config::default());
    engine
        .create_tensor("t", DType::U8, SampleCompression::None, ChunkCompression::Lz4, Some(64))
        .unwrap();

    for i in 0u8..20 {
        engine.append("t", &vec![i; 5], &[5]).unwrap();
    }
    engine.flush("t").unwrap();

    let mut reloaded = ChunkEngine::new(provider, Config::default());
    reloaded.load_tensor("t").unwrap();
    for i in 0u8..20 {
        let sample = reloaded.read("t", Selection::Index(i as i64)).unwrap();
        assert_eq!(sample[0].bytes, vec![i; 5]);
    }
}

/// Sample-level and chunk-level compression are mutually exclusive: a
/// tensor cannot be created asking for both at once.
#[test]
fn test_sample_and_chunk_compression_cannot_both_be_set() {
    let mut engine = engine();
    let err = engine
        .create_tensor("t", DType::U8, SampleCompression::Jpeg, ChunkCompression::Lz4, None)
        .unwrap_err();
    assert!(format!("{}", err).contains("mutually exclusive"));
}
