use std::sync::Arc;

use chunk_store::{ChunkCompression, ChunkEngine, Config, DType, MemoryProvider, SampleCompression, Selection};

fn engine() -> ChunkEngine {
    ChunkEngine::new(Arc::new(MemoryProvider::new()), Config::default())
}

/// Updating an in-place sample changes only that sample's bytes and shape,
/// leaving its neighbours (stored in the same chunk) untouched.
#[test]
fn test_update_leaves_neighbouring_samples_untouched() {
    let mut engine = engine();
    engine
        .create_tensor("t", DType::U8, SampleCompression::None, ChunkCompression::None, None)
        .unwrap();
    for i in 0u8..6 {
        engine.append("t", &[i; 4], &[2, 2]).unwrap();
    }

    engine.update("t", 3, &[9u8; 6], &[2, 3]).unwrap();

    let updated = engine.read("t", Selection::Index(3)).unwrap();
    assert_eq!(updated[0].bytes, vec![9u8; 6]);
    assert_eq!(updated[0].shape, vec![2, 3]);

    assert_eq!(engine.read("t", Selection::Index(0)).unwrap()[0].bytes, vec![0u8; 4]);
    assert_eq!(engine.read("t", Selection::Index(5)).unwrap()[0].bytes, vec![5u8; 4]);
    assert_eq!(
        engine.shape_interval("t").unwrap(),
        (vec![2, 2], vec![2, 3])
    );
}

/// Popping repeatedly drains a tensor back down to empty, and an empty
/// tensor refuses to pop further.
#[test]
fn test_repeated_pop_drains_tensor_to_empty() {
    let mut engine = engine();
    engine
        .create_tensor("t", DType::U8, SampleCompression::None, ChunkCompression::None, None)
        .unwrap();
    for i in 0u8..4 {
        engine.append("t", &[i; 2], &[2]).unwrap();
    }

    for expected_remaining in (0..4).rev() {
        engine.pop("t").unwrap();
        assert_eq!(engine.num_samples("t").unwrap(), expected_remaining);
    }

    assert!(engine.pop("t").is_err());
}

/// Popping an oversized, tiled sample must delete every chunk it was
/// spread across, not just its first.
#[test]
fn test_pop_of_tiled_sample_deletes_every_tile() {
    let mut engine = engine();
    engine
        .create_tensor("t", DType::U8, SampleCompression::None, ChunkCompression::None, Some(32))
        .unwrap();
    engine.append("t", &[1u8; 10], &[10]).unwrap();
    engine.append("t", &[2u8; 100], &[100]).unwrap();

    engine.pop("t").unwrap();

    assert_eq!(engine.num_samples("t").unwrap(), 1);
    assert_eq!(engine.read("t", Selection::Index(0)).unwrap()[0].bytes, vec![1u8; 10]);
}
