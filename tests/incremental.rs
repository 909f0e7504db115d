//! Appending to the last chunk must leave the first nine alone.
//!
//! This is the only test in this binary on purpose: it reads the
//! process-wide `type_structure` counter and must not race with other
//! typing work.

use mlyn::buffer::Buffer;
use mlyn::typechecker::type_structure_count;

#[test]
fn test_appending_to_last_chunk_retypes_only_it() {
    let original = (0..10)
        .map(|i| format!("let a{i} = {i}"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut buffer = Buffer::new();
    buffer.tell(&original);

    let outline_before = buffer.outline();
    assert_eq!(outline_before.len(), 10);
    let after_open = type_structure_count();

    // touch only the tenth definition
    let edited = original + "9";
    buffer.tell(&edited);

    let recomputed = type_structure_count() - after_open;
    assert_eq!(recomputed, 1, "chunks 1..9 must not be re-typed");

    let outline_after = buffer.outline();
    assert_eq!(outline_after.len(), 10);
    assert_eq!(outline_before[..9], outline_after[..9]);
    assert_eq!(outline_after[9].type_repr.as_deref(), Some("int"));
}
