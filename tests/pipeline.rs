use sketchblocks_core::document::MAX_NESTING;
use sketchblocks_core::error::BlocksError;
use sketchblocks_core::sketch::Shape;
use sketchblocks_core::{generate_code, load_program, render_document_svg, run_sketch, RunOptions};

const CANVAS: &str = r#"<xml xmlns="https://developers.google.com/blockly/xml">
  <block type="p5_create_canvas" id="canvas" x="20" y="20">
    <value name="width"><block type="math_number" id="w"><field name="NUM">200</field></block></value>
    <value name="height"><block type="math_number" id="h"><field name="NUM">200</field></block></value>
  </block>
</xml>"#;

const BOUNCING: &str = r##"<xml xmlns="https://developers.google.com/blockly/xml">
  <variables><variable id="v1">size</variable></variables>
  <block type="p5_setup" id="setup" x="10" y="10">
    <statement name="statements">
      <block type="p5_create_canvas" id="canvas">
        <value name="width"><block type="math_number" id="cw"><field name="NUM">120</field></block></value>
        <value name="height"><block type="math_number" id="ch"><field name="NUM">80</field></block></value>
        <next>
          <block type="variables_set" id="init">
            <field name="VAR" id="v1">size</field>
            <value name="VALUE">
              <block type="math_number" id="ten"><field name="NUM">10</field></block>
            </value>
          </block>
        </next>
      </block>
    </statement>
  </block>
  <block type="p5_draw" id="draw" x="10" y="200">
    <statement name="statements">
      <block type="p5_background" id="bg">
        <value name="NAME">
          <block type="colour_picker" id="blue"><field name="COLOUR">#336699</field></block>
        </value>
        <next>
          <block type="controls_repeat_ext" id="repeat">
            <value name="TIMES">
              <shadow type="math_number" id="three"><field name="NUM">3</field></shadow>
            </value>
            <statement name="DO">
              <block type="p5_ellipse" id="dot">
                <value name="x"><block type="p5_frame_count" id="frame"/></value>
                <value name="width">
                  <block type="variables_get" id="sw"><field name="VAR" id="v1">size</field></block>
                </value>
                <value name="height">
                  <block type="variables_get" id="sh"><field name="VAR" id="v1">size</field></block>
                </value>
              </block>
            </statement>
          </block>
        </next>
      </block>
    </statement>
  </block>
</xml>"##;

/// The starter workspace of the block editor, as the editor saves it.
const STARTER: &str = r##"<xml xmlns="https://developers.google.com/blockly/xml"><variables><variable id="cFou2T#bz1.VWVTcIu%x">x</variable></variables><block type="p5_setup" id="rMdb?$_l5_hf6UKDeY7@" x="163" y="48"><statement name="statements"><block type="p5_create_canvas" id="6]@$Oy{R!;4=dM.ltJZK"><value name="width"><block type="math_number" id="tyalS*Jld+=^x!K|~HGp"><field name="NUM">200</field></block></value><value name="height"><block type="math_number" id="Zv*:FT]=Mqx!.?f[nVI6"><field name="NUM">200</field></block></value><next><block type="p5_background" id="w~|)+=MU}|YJ`;Wcd6@^"><value name="NAME"><block type="colour_picker" id="/hwd7uxDkH2CZW/JCg_w"><field name="COLOUR">#ff0000</field></block></value><next><block type="variables_set" id="@gMQv9_u@:m,|rq^x@hc"><field name="VAR" id="cFou2T#bz1.VWVTcIu%x">x</field><value name="VALUE"><block type="math_number" id="w8`;g5+e:w@j+~m.2i^5"><field name="NUM">0</field></block></value><next><block type="controls_repeat_ext" id="{lPkERx$9x`cjj]~5YEN"><value name="TIMES"><shadow type="math_number" id="hgt^Ubdu@MKU8w(haW^*"><field name="NUM">10</field></shadow></value><statement name="DO"><block type="p5_point" id="(2sI}k+{T{:$?Q/:+?})"><value name="x"><block type="math_number" id="2H/MW2;,]{:rf!sunPN{"><field name="NUM">50</field></block></value><value name="y"><block type="math_number" id="fd[`{w%DvA[T_7dA+2b;"><field name="NUM">50</field></block></value></block></statement></block></next></block></next></block></next></block></statement></block></xml>"##;

/// A setup hook drawing one point whose x is `levels` nested random-integer blocks deep.
fn nested_random(levels: usize) -> String {
    let mut value = r#"<block type="math_number"><field name="NUM">3</field></block>"#.to_string();
    for _ in 0..levels {
        value = format!(r#"<block type="math_random_int"><value name="TO">{}</value></block>"#, value);
    }
    format!(
        r#"<xml><block type="p5_setup"><statement name="statements"><block type="p5_point"><value name="x">{}</value></block></statement></block></xml>"#,
        value
    )
}

/// `levels` additions nested through their right operand.
fn nested_sum(levels: usize) -> String {
    let mut value = r#"<block type="math_number"><field name="NUM">1</field></block>"#.to_string();
    for _ in 0..levels {
        value = format!(
            r#"<block type="math_arithmetic"><field name="OP">ADD</field><value name="A"><block type="math_number"><field name="NUM">1</field></block></value><value name="B">{}</value></block>"#,
            value
        );
    }
    format!(
        r#"<xml><block type="p5_setup"><statement name="statements"><block type="p5_point"><value name="x">{}</value></block></statement></block></xml>"#,
        value
    )
}

#[test]
fn starter_workspace_generates_setup_hook() {
    let expected = "\
var x;
p5.setup = function() {
  p5.createCanvas(200, 200);
  p5.background('#ff0000');
  x = 0;
  for (var count = 0; count < 10; count++) {
    p5.point(50, 50);
  }
};
";
    assert_eq!(generate_code(STARTER).unwrap(), expected);

    let sketch = run_sketch(expected, "p5", &RunOptions::default()).unwrap();
    let sketch = sketch.borrow();
    assert_eq!(sketch.size(), (200.0, 200.0));
    assert_eq!(sketch.background(), Some("#ff0000"));
    assert_eq!(sketch.commands().len(), 10);
    assert_eq!(sketch.commands()[0].shape, Shape::Point { x: 50.0, y: 50.0 });
}

#[test]
fn deepest_loadable_workspace_still_runs() {
    // the point and the innermost number sit on top of the nested blocks
    let code = generate_code(&nested_random(MAX_NESTING - 2)).unwrap();
    let sketch = run_sketch(&code, "p5", &RunOptions::default()).unwrap();
    assert_eq!(sketch.borrow().commands().len(), 1);

    let code = generate_code(&nested_sum(MAX_NESTING - 2)).unwrap();
    let sketch = run_sketch(&code, "p5", &RunOptions::default()).unwrap();
    let sketch = sketch.borrow();
    let Shape::Point { x, .. } = &sketch.commands()[0].shape else {
        panic!("expected a point");
    };
    assert_eq!(*x, (MAX_NESTING - 1) as f64);
}

#[test]
fn overly_deep_workspaces_are_refused() {
    let err = generate_code(&nested_sum(200)).unwrap_err();
    assert!(matches!(err, BlocksError::Document(_)));
    assert!(err.to_string().contains("levels deep"));

    assert!(generate_code(&nested_random(MAX_NESTING - 1)).is_err());
}

#[test]
fn deeply_nested_source_is_a_generation_error() {
    let source = format!("p5.setup = function() {{ p5.point({}1{}, 0); }};", "(".repeat(20_000), ")".repeat(20_000));
    let err = run_sketch(&source, "p5", &RunOptions::default()).unwrap_err();
    assert!(err.is_generation());
}

#[test]
fn canvas_document_generates_bound_call() {
    assert_eq!(generate_code(CANVAS).unwrap(), "p5.createCanvas(200, 200);\n");
}

#[test]
fn hooks_and_loops_generate_bound_code() {
    let expected = "\
var size;
p5.setup = function() {
  p5.createCanvas(120, 80);
  size = 10;
};
p5.draw = function() {
  p5.background('#336699');
  for (var count = 0; count < 3; count++) {
    p5.ellipse(p5.frameCount, 0, size, size);
  }
};
";
    assert_eq!(generate_code(BOUNCING).unwrap(), expected);
}

#[test]
fn generated_code_runs_and_renders() {
    let code = generate_code(BOUNCING).unwrap();
    let options = RunOptions {
        frames: 2,
        ..RunOptions::default()
    };
    let sketch = run_sketch(&code, "p5", &options).unwrap();
    let sketch = sketch.borrow();

    assert!(sketch.is_removed());
    assert_eq!(sketch.size(), (120.0, 80.0));
    assert_eq!(sketch.frame_count(), 2);
    assert_eq!(sketch.background(), Some("#336699"));
    assert_eq!(sketch.commands().len(), 3);
    for command in sketch.commands() {
        assert_eq!(
            command.shape,
            Shape::Ellipse {
                cx: 2.0,
                cy: 0.0,
                width: 10.0,
                height: 10.0
            }
        );
    }

    let svg = render_document_svg(BOUNCING, &options).unwrap();
    assert_eq!(svg.matches("<ellipse").count(), 3);
    assert!(svg.contains("rx=\"5\""));
}

#[test]
fn unknown_block_types_are_rejected_on_load() {
    let xml = r#"<xml><block type="p5_teapot" id="t"/></xml>"#;
    let err = load_program(xml).unwrap_err();
    assert!(matches!(
        err,
        BlocksError::UnknownBlockType { ref block_type, .. } if block_type == "p5_teapot"
    ));
}

#[test]
fn runtime_errors_reach_the_caller() {
    let err = run_sketch("p5.draw = function() { p5.width = 3; };", "p5", &RunOptions::default())
        .unwrap_err();
    assert!(matches!(err, BlocksError::Runtime(_)));
    assert!(err.to_string().contains("read-only"));
}

#[test]
fn invalid_source_is_a_generation_error() {
    let err = run_sketch("p5.point(1, 2", "p5", &RunOptions::default()).unwrap_err();
    assert!(err.is_generation());
}
