//! Parser tests across the supported languages (rust/python/typescript/javascript/go).

use pommel::language::{ChunkType, REGISTRY};
use pommel::parser::Parser;

fn fixtures_path() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

#[test]
fn test_rust_function_extraction() {
    let parser = Parser::new().unwrap();
    let path = fixtures_path().join("sample.rs");
    let chunks = parser.parse_file(&path).unwrap();

    assert!(chunks.len() >= 5, "expected at least 5 chunks, got {}", chunks.len());

    let add_fn = chunks.iter().find(|c| c.name == "add" && c.chunk_type == ChunkType::Function);
    assert!(add_fn.is_some(), "should find 'add' function");

    let add_fn = add_fn.unwrap();
    assert_eq!(add_fn.language, "rust");
    assert!(add_fn.content.contains("a + b"));
}

#[test]
fn test_rust_method_detection() {
    let parser = Parser::new().unwrap();
    let path = fixtures_path().join("sample.rs");
    let chunks = parser.parse_file(&path).unwrap();

    let methods: Vec<_> = chunks.iter().filter(|c| c.chunk_type == ChunkType::Method).collect();
    assert!(!methods.is_empty(), "should find methods in impl block");

    let new_method = chunks.iter().find(|c| c.name == "new" && c.chunk_type == ChunkType::Method);
    assert!(new_method.is_some(), "Calculator::new should be a method");
}

#[test]
fn test_rust_signature_extraction() {
    let parser = Parser::new().unwrap();
    let path = fixtures_path().join("sample.rs");
    let chunks = parser.parse_file(&path).unwrap();

    let add_fn = chunks
        .iter()
        .find(|c| c.name == "add" && c.chunk_type == ChunkType::Function)
        .unwrap();

    assert!(add_fn.signature.contains("pub fn add"), "signature should contain function declaration");
    assert!(!add_fn.signature.contains('{'), "signature should not contain body");
}

#[test]
fn test_rust_doc_comment_extraction() {
    let parser = Parser::new().unwrap();
    let path = fixtures_path().join("sample.rs");
    let chunks = parser.parse_file(&path).unwrap();

    let add_fn = chunks
        .iter()
        .find(|c| c.name == "add" && c.chunk_type == ChunkType::Function)
        .unwrap();

    assert!(add_fn.doc.is_some(), "should extract doc comment");
    assert!(add_fn.doc.as_ref().unwrap().contains("Adds two numbers"));
}

#[test]
fn test_python_function_extraction() {
    let parser = Parser::new().unwrap();
    let path = fixtures_path().join("sample.py");
    let chunks = parser.parse_file(&path).unwrap();

    assert!(!chunks.is_empty(), "should find chunks in python file");

    let greet_fn = chunks.iter().find(|c| c.name == "greet");
    assert!(greet_fn.is_some(), "should find 'greet' function");
    assert_eq!(greet_fn.unwrap().language, "python");
}

#[test]
fn test_python_method_detection() {
    let parser = Parser::new().unwrap();
    let path = fixtures_path().join("sample.py");
    let chunks = parser.parse_file(&path).unwrap();

    let methods: Vec<_> = chunks.iter().filter(|c| c.chunk_type == ChunkType::Method).collect();
    assert!(!methods.is_empty(), "should find methods in python class");

    let increment = chunks.iter().find(|c| c.name == "increment");
    assert!(increment.is_some(), "should find 'increment' method");
    assert_eq!(increment.unwrap().chunk_type, ChunkType::Method);
}

#[test]
fn test_typescript_function_extraction() {
    let parser = Parser::new().unwrap();
    let path = fixtures_path().join("sample.ts");
    let chunks = parser.parse_file(&path).unwrap();

    assert!(!chunks.is_empty(), "should find chunks in typescript file");

    let format_fn = chunks.iter().find(|c| c.name == "formatName");
    assert!(format_fn.is_some(), "should find 'formatName' function");
    assert_eq!(format_fn.unwrap().language, "typescript");
}

#[test]
fn test_typescript_arrow_function() {
    let parser = Parser::new().unwrap();
    let path = fixtures_path().join("sample.ts");
    let chunks = parser.parse_file(&path).unwrap();

    let double_fn = chunks.iter().find(|c| c.name == "double");
    assert!(double_fn.is_some(), "should find 'double' arrow function");
}

#[test]
fn test_typescript_method_detection() {
    let parser = Parser::new().unwrap();
    let path = fixtures_path().join("sample.ts");
    let chunks = parser.parse_file(&path).unwrap();

    let greet = chunks.iter().find(|c| c.name == "greet");
    assert!(greet.is_some(), "should find 'greet' method");
    assert_eq!(greet.unwrap().chunk_type, ChunkType::Method);
}

#[test]
fn test_javascript_function_extraction() {
    let parser = Parser::new().unwrap();
    let path = fixtures_path().join("sample.js");
    let chunks = parser.parse_file(&path).unwrap();

    assert!(!chunks.is_empty(), "should find chunks in javascript file");

    let validate_fn = chunks.iter().find(|c| c.name == "validateEmail");
    assert!(validate_fn.is_some(), "should find 'validateEmail' function");
    assert_eq!(validate_fn.unwrap().language, "javascript");
}

#[test]
fn test_go_function_extraction() {
    let parser = Parser::new().unwrap();
    let path = fixtures_path().join("sample.go");
    let chunks = parser.parse_file(&path).unwrap();

    assert!(!chunks.is_empty(), "should find chunks in go file");

    let greet_fn = chunks.iter().find(|c| c.name == "Greet");
    assert!(greet_fn.is_some(), "should find 'Greet' function");

    let greet_fn = greet_fn.unwrap();
    assert_eq!(greet_fn.language, "go");
    assert_eq!(greet_fn.chunk_type, ChunkType::Function);
}

#[test]
fn test_go_method_detection() {
    let parser = Parser::new().unwrap();
    let path = fixtures_path().join("sample.go");
    let chunks = parser.parse_file(&path).unwrap();

    let push = chunks.iter().find(|c| c.name == "Push");
    assert!(push.is_some(), "should find 'Push' method");
    assert_eq!(push.unwrap().chunk_type, ChunkType::Method);
}

#[test]
fn test_go_struct_detection() {
    let parser = Parser::new().unwrap();
    let path = fixtures_path().join("sample.go");
    let chunks = parser.parse_file(&path).unwrap();

    let stack = chunks.iter().find(|c| c.name == "Stack");
    assert!(stack.is_some(), "should find 'Stack' struct");
    assert_eq!(stack.unwrap().chunk_type, ChunkType::Struct);
}

#[test]
fn test_language_from_extension() {
    assert_eq!(REGISTRY.from_extension("rs").map(|d| d.name), Some("rust"));
    assert_eq!(REGISTRY.from_extension("py").map(|d| d.name), Some("python"));
    assert_eq!(REGISTRY.from_extension("pyi").map(|d| d.name), Some("python"));
    assert_eq!(REGISTRY.from_extension("ts").map(|d| d.name), Some("typescript"));
    assert_eq!(REGISTRY.from_extension("tsx").map(|d| d.name), Some("typescript"));
    assert_eq!(REGISTRY.from_extension("js").map(|d| d.name), Some("javascript"));
    assert_eq!(REGISTRY.from_extension("jsx").map(|d| d.name), Some("javascript"));
    assert_eq!(REGISTRY.from_extension("mjs").map(|d| d.name), Some("javascript"));
    assert_eq!(REGISTRY.from_extension("go").map(|d| d.name), Some("go"));
    assert_eq!(REGISTRY.from_extension("txt"), None);
}

#[test]
fn test_supported_extensions() {
    let parser = Parser::new().unwrap();
    let exts = parser.supported_extensions();

    assert!(exts.contains(&"rs"));
    assert!(exts.contains(&"py"));
    assert!(exts.contains(&"ts"));
    assert!(exts.contains(&"js"));
    assert!(exts.contains(&"go"));
}
