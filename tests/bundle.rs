use clap::Parser;
use sketchblocks_core::bundle::{read_bundle_file, write_bundle_file, SketchBundle};
use sketchblocks_core::cli::Args;
use sketchblocks_core::{load_program, run_cli};
use std::ffi::OsStr;
use std::fs;

const WORKSPACE: &str = r#"<xml xmlns="https://developers.google.com/blockly/xml">
  <block type="p5_setup" id="setup" x="0" y="0">
    <statement name="statements">
      <block type="p5_create_canvas" id="canvas">
        <value name="width"><block type="math_number" id="cw"><field name="NUM">64</field></block></value>
        <value name="height"><block type="math_number" id="ch"><field name="NUM">48</field></block></value>
        <next>
          <block type="p5_rect" id="box">
            <value name="x"><block type="math_number" id="x"><field name="NUM">4</field></block></value>
            <value name="y"><block type="math_number" id="y"><field name="NUM">4</field></block></value>
            <value name="width"><block type="math_number" id="w"><field name="NUM">20</field></block></value>
            <value name="height"><block type="math_number" id="h"><field name="NUM">10</field></block></value>
            <value name="round"><block type="math_number" id="r"><field name="NUM">3</field></block></value>
          </block>
        </next>
      </block>
    </statement>
  </block>
</xml>"#;

fn cli_args(parts: &[&OsStr]) -> Args {
    Args::parse_from(parts.iter().copied())
}

#[test]
fn bundle_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("sketch.zip");
    let bundle = SketchBundle {
        workspace_xml: WORKSPACE.to_string(),
        code: "p5.setup = function() {\n};\n".to_string(),
        binding: "p5".to_string(),
        preview_svg: Some("<svg xmlns=\"http://www.w3.org/2000/svg\"/>".to_string()),
    };
    write_bundle_file(&bundle, &path).unwrap();
    assert_eq!(read_bundle_file(&path).unwrap(), bundle);
}

#[test]
fn cli_writes_code_svg_document_and_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("workspace.xml");
    fs::write(&input, WORKSPACE).unwrap();
    let code_path = dir.path().join("out").join("sketch.js");
    let svg_path = dir.path().join("out").join("sketch.svg");
    let doc_path = dir.path().join("out").join("saved.xml");
    let bundle_path = dir.path().join("out").join("sketch.zip");

    let args = cli_args(&[
        OsStr::new("sketchblocks-rs"),
        input.as_os_str(),
        code_path.as_os_str(),
        OsStr::new("--svg"),
        svg_path.as_os_str(),
        OsStr::new("--save-document"),
        doc_path.as_os_str(),
        OsStr::new("--bundle"),
        bundle_path.as_os_str(),
    ]);
    run_cli(&args).unwrap();

    let code = fs::read_to_string(&code_path).unwrap();
    assert_eq!(
        code,
        "p5.setup = function() {\n  p5.createCanvas(64, 48);\n  p5.rect(4, 4, 20, 10, 3);\n};\n"
    );

    let svg = fs::read_to_string(&svg_path).unwrap();
    assert!(svg.contains("viewBox=\"0 0 64 48\""));
    assert!(svg.contains("rx=\"3\""));

    let saved = fs::read_to_string(&doc_path).unwrap();
    let original = load_program(WORKSPACE).unwrap();
    let reloaded = load_program(&saved).unwrap();
    assert_eq!(reloaded.len(), original.len());
    for block in original.blocks() {
        assert_eq!(reloaded.get(&block.id), Some(block));
    }

    let bundle = read_bundle_file(&bundle_path).unwrap();
    assert_eq!(bundle.code, code);
    assert_eq!(bundle.preview_svg.as_deref(), Some(svg.as_str()));

    // A bundle is itself a valid input.
    let rerun_path = dir.path().join("out").join("again.js");
    let args = cli_args(&[
        OsStr::new("sketchblocks-rs"),
        bundle_path.as_os_str(),
        rerun_path.as_os_str(),
    ]);
    run_cli(&args).unwrap();
    assert_eq!(fs::read_to_string(&rerun_path).unwrap(), code);
}

#[test]
fn cli_custom_binding_and_raw_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("workspace.xml");
    fs::write(&input, WORKSPACE).unwrap();

    let bound = dir.path().join("bound.js");
    let args = cli_args(&[
        OsStr::new("sketchblocks-rs"),
        input.as_os_str(),
        bound.as_os_str(),
        OsStr::new("--binding"),
        OsStr::new("g"),
    ]);
    run_cli(&args).unwrap();
    assert!(fs::read_to_string(&bound).unwrap().contains("g.rect(4, 4, 20, 10, 3);"));

    let raw = dir.path().join("raw.js");
    let args = cli_args(&[
        OsStr::new("sketchblocks-rs"),
        input.as_os_str(),
        raw.as_os_str(),
        OsStr::new("--raw"),
    ]);
    run_cli(&args).unwrap();
    assert!(fs::read_to_string(&raw).unwrap().contains("\n  rect(4, 4, 20, 10, 3);"));
}

#[test]
fn cli_rejects_svg_with_raw() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("workspace.xml");
    fs::write(&input, WORKSPACE).unwrap();
    let svg = dir.path().join("x.svg");
    let args = cli_args(&[
        OsStr::new("sketchblocks-rs"),
        input.as_os_str(),
        OsStr::new("--raw"),
        OsStr::new("--svg"),
        svg.as_os_str(),
    ]);
    assert!(run_cli(&args).is_err());
}
