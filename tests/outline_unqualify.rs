//! End-to-end protocol scenarios driven through the built binary.

use serde_json::json;
use test_utils::{expect_class, run_single};

const BINARY: &str = env!("CARGO_BIN_EXE_mlyn");

const FLAT_MODULE: &str = "module M = struct\n  let u = ()\nend\nopen M\nlet u = M.u";

#[test]
fn test_outline_lists_module_and_values() {
    let response = run_single(
        BINARY,
        &json!({"command": "outline", "source": FLAT_MODULE}),
    )
    .unwrap();
    let value = expect_class(response, "return");

    let entries = value.as_array().unwrap();
    assert_eq!(entries.len(), 2);

    assert_eq!(entries[0]["name"], "M");
    assert_eq!(entries[0]["kind"], "Module");
    let children = entries[0]["children"].as_array().unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0]["name"], "u");
    assert_eq!(children[0]["kind"], "Value");
    assert_eq!(children[0]["type"], "unit");

    assert_eq!(entries[1]["name"], "u");
    assert_eq!(entries[1]["kind"], "Value");
    assert_eq!(entries[1]["type"], "unit");
}

#[test]
fn test_unqualify_after_open() {
    let response = run_single(
        BINARY,
        &json!({
            "command": "refactor-open",
            "source": FLAT_MODULE,
            "position": {"line": 5, "col": 6},
            "action": "unqualify"
        }),
    )
    .unwrap();
    let value = expect_class(response, "return");

    assert_eq!(
        value,
        json!([{
            "start": {"line": 5, "col": 8},
            "end": {"line": 5, "col": 11},
            "content": "u"
        }])
    );
}

#[test]
fn test_unqualify_nested_module() {
    let source = "module M = struct\n  module N = struct\n    let u = ()\n  end\nend\nopen M.N\nlet u = M.N.u";
    let response = run_single(
        BINARY,
        &json!({
            "command": "refactor-open",
            "source": source,
            "position": {"line": 6, "col": 6},
            "action": "unqualify"
        }),
    )
    .unwrap();
    let value = expect_class(response, "return");

    assert_eq!(
        value,
        json!([{
            "start": {"line": 7, "col": 8},
            "end": {"line": 7, "col": 13},
            "content": "u"
        }])
    );
}

#[test]
fn test_unqualify_multiline_identifier() {
    // the identifier spans two lines; the replacement does too, and the
    // content is the remaining path printed with dots
    let source =
        "module M = struct\n  module N = struct\n    let u = ()\n  end\nend\nopen M\nlet u = M.N.\nu";
    let response = run_single(
        BINARY,
        &json!({
            "command": "refactor-open",
            "source": source,
            "position": {"line": 6, "col": 5},
            "action": "unqualify"
        }),
    )
    .unwrap();
    let value = expect_class(response, "return");

    assert_eq!(
        value,
        json!([{
            "start": {"line": 7, "col": 8},
            "end": {"line": 8, "col": 1},
            "content": "N.u"
        }])
    );
}

#[test]
fn test_type_at_position() {
    let response = run_single(
        BINARY,
        &json!({
            "command": "type-at-pos",
            "source": FLAT_MODULE,
            "position": {"line": 5, "col": 8}
        }),
    )
    .unwrap();
    let value = expect_class(response, "return");
    assert_eq!(value["type"], "unit");
}

#[test]
fn test_completion_of_module_members() {
    let response = run_single(
        BINARY,
        &json!({
            "command": "complete-prefix",
            "source": FLAT_MODULE,
            "position": {"line": 5, "col": 10},
            "prefix": "M.u"
        }),
    )
    .unwrap();
    let value = expect_class(response, "return");

    let entries = value["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["name"], "u");
    assert_eq!(entries[0]["kind"], "Value");
    assert_eq!(entries[0]["desc"], "unit");
}

#[test]
fn test_errors_on_broken_buffer() {
    let response = run_single(
        BINARY,
        &json!({
            "command": "errors",
            "source": "let a = missing\nlet b = 2"
        }),
    )
    .unwrap();
    let value = expect_class(response, "return");

    let reports = value.as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["kind"], "type");
    assert_eq!(reports[0]["start"]["line"], 1);
}
