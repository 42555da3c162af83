mod common;

use common::{Program, run, write_stmt};
use iconx::image::{Image, Instruction as I, Operator as Op, ProcBuilder, from_bytes, to_bytes};
use iconx::{LoadError, load_image};
use std::path::PathBuf;

fn sample() -> Image {
    let mut p = Program::new();
    p.record("pair", &["a", "b"]);
    let mut b = ProcBuilder::new("main", 0, 0);
    let greeting = p.str("from an image file");
    write_stmt(&mut p, &mut b, &[greeting]);
    write_stmt(&mut p, &mut b, &[I::Pnull, I::Int(6), I::Int(7), I::Op(Op::Mult)]);
    b.emit(I::Pfail);
    p.procedure(b);
    p.finish()
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("iconx-{}-{name}.icx", std::process::id()))
}

#[test]
fn encoded_images_run_the_same() {
    let image = sample();
    let bytes = to_bytes(&image).expect("encode");
    let decoded = from_bytes(&bytes).expect("decode");
    assert_eq!(decoded, image);
    assert_eq!(to_bytes(&decoded).expect("re-encode"), bytes);

    let out = run(decoded);
    assert_eq!(out.output, "from an image file\n42\n");
}

#[test]
fn images_load_from_disk() {
    let path = temp_path("load");
    std::fs::write(&path, to_bytes(&sample()).expect("encode")).expect("write image");
    let loaded = load_image(&path);
    let _ = std::fs::remove_file(&path);
    assert_eq!(loaded.expect("load"), sample());
}

#[test]
fn truncated_images_are_rejected() {
    let path = temp_path("truncated");
    let bytes = to_bytes(&sample()).expect("encode");
    std::fs::write(&path, &bytes[..bytes.len() / 2]).expect("write image");
    let loaded = load_image(&path);
    let _ = std::fs::remove_file(&path);
    assert!(matches!(loaded, Err(LoadError::Decode { .. })));
}

#[test]
fn missing_images_are_io_errors() {
    let err = load_image(&temp_path("never-written")).unwrap_err();
    assert!(matches!(err, LoadError::Io { .. }));
    assert!(err.to_string().starts_with("cannot read"));
}
