//! A type error in one chunk must not poison the rest of the buffer, and
//! incremental edits must agree with a from-scratch analysis.

use mlyn::buffer::Buffer;

#[test]
fn test_error_in_chunk_five_of_ten() {
    let source = (0..10)
        .map(|i| {
            if i == 4 {
                "let a4 = missing".to_string()
            } else {
                format!("let a{i} = {i}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut buffer = Buffer::new();
    buffer.tell(&source);

    // the error is reported exactly once
    let errors = buffer.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("missing"));
    assert_eq!(errors[0].start.line, 5);

    // later chunks still type and stay queryable
    assert_eq!(buffer.type_at(8, 4).as_deref(), Some("int"));
    let outline = buffer.outline();
    assert_eq!(outline.len(), 9);
    assert!(outline.iter().any(|entry| entry.name == "a9"));
}

#[test]
fn test_edit_script_replay_equivalence() {
    let script = [
        "let a = 1",
        "let a = 1\nlet b = succ a",
        "let a = 1\nlet b = succ a\nmodule M = struct\nlet u = ()\nend",
        "let a = 1\nlet b = not a\nmodule M = struct\nlet u = ()\nend",
    ];

    let mut incremental = Buffer::new();
    for step in &script {
        incremental.tell(step);
    }

    let mut fresh = Buffer::new();
    fresh.tell(script.last().unwrap());

    assert_eq!(incremental.outline(), fresh.outline());
    assert_eq!(incremental.errors(), fresh.errors());
    assert_eq!(incremental.type_at(1, 4), fresh.type_at(1, 4));
    assert_eq!(incremental.type_at(2, 4), fresh.type_at(2, 4));
}

#[test]
fn test_fixing_an_error_clears_it() {
    let mut buffer = Buffer::new();
    buffer.tell("let a = missing");
    assert_eq!(buffer.errors().len(), 1);

    buffer.tell("let a = 1");
    assert!(buffer.errors().is_empty());
    assert_eq!(buffer.type_at(1, 4).as_deref(), Some("int"));
}
