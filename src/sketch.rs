use crate::error::{BlocksError, BlocksResult};
use crate::interp::{RuntimeError, Value};
use crate::schema::format_num;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use xmltree::{Element, EmitterConfig, XMLNode};

const SVG_NS: &str = "http://www.w3.org/2000/svg";

/// The object generated code is bound against. Primitives are methods, system variables are
/// readable members, and `setup`/`draw`/`mousePressed` are writable hook members.
pub trait DrawingContext {
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, RuntimeError>;
    fn get(&self, name: &str) -> Result<Value, RuntimeError>;
    fn set(&mut self, name: &str, value: Value) -> Result<(), RuntimeError>;

    /// Called once before every `draw`.
    fn begin_frame(&mut self) {}

    fn move_pointer(&mut self, _x: f64, _y: f64) {}

    /// Releases the instance. Hosts call this exactly once.
    fn remove(&mut self);
}

pub type ContextHandle = Rc<RefCell<dyn DrawingContext>>;

#[derive(Debug, Clone, Copy)]
pub struct SketchOptions {
    pub seed: u64,
    pub default_width: f64,
    pub default_height: f64,
    pub display_width: f64,
    pub display_height: f64,
}

impl Default for SketchOptions {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            default_width: 100.0,
            default_height: 100.0,
            display_width: 1280.0,
            display_height: 720.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point { x: f64, y: f64 },
    Line { x1: f64, y1: f64, x2: f64, y2: f64 },
    Rect { x: f64, y: f64, width: f64, height: f64, radius: f64 },
    Ellipse { cx: f64, cy: f64, width: f64, height: f64 },
    Text { text: String, x: f64, y: f64, size: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    pub shape: Shape,
    pub fill: Option<String>,
    pub stroke: Option<String>,
    pub stroke_weight: f64,
}

/// SplitMix64, so `random()` is reproducible for a given seed.
#[derive(Debug)]
struct Rng64 {
    state: u64,
}

impl Rng64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn next_f64_01(&mut self) -> f64 {
        let v = self.next_u64() >> 11;
        (v as f64) * (1.0 / ((1u64 << 53) as f64))
    }
}

/// A recording drawing context: every primitive lands in a display list that can be exported
/// as SVG.
#[derive(Debug)]
pub struct Sketch {
    options: SketchOptions,
    width: f64,
    height: f64,
    background: Option<String>,
    fill: Option<String>,
    stroke: Option<String>,
    stroke_weight: f64,
    text_size: f64,
    commands: Vec<DrawCommand>,
    props: HashMap<String, Value>,
    items: HashMap<String, Value>,
    rng: Rng64,
    frame_count: u64,
    mouse: (f64, f64),
    removed: bool,
}

impl Sketch {
    pub fn new(options: SketchOptions) -> Self {
        Self {
            options,
            width: options.default_width,
            height: options.default_height,
            background: None,
            fill: Some("#ffffff".to_string()),
            stroke: Some("#000000".to_string()),
            stroke_weight: 1.0,
            text_size: 12.0,
            commands: Vec::new(),
            props: HashMap::new(),
            items: HashMap::new(),
            rng: Rng64::new(options.seed),
            frame_count: 0,
            mouse: (0.0, 0.0),
            removed: false,
        }
    }

    pub fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    pub fn background(&self) -> Option<&str> {
        self.background.as_deref()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn set_mouse(&mut self, x: f64, y: f64) {
        self.mouse = (x, y);
    }

    /// Renders the display list as a standalone SVG document.
    pub fn to_svg(&self) -> BlocksResult<String> {
        let mut root = Element::new("svg");
        root.attributes.insert("xmlns".to_string(), SVG_NS.to_string());
        root.attributes
            .insert("width".to_string(), format_num(self.width));
        root.attributes
            .insert("height".to_string(), format_num(self.height));
        root.attributes.insert(
            "viewBox".to_string(),
            format!("0 0 {} {}", format_num(self.width), format_num(self.height)),
        );

        if let Some(background) = &self.background {
            let mut rect = Element::new("rect");
            rect.attributes
                .insert("width".to_string(), "100%".to_string());
            rect.attributes
                .insert("height".to_string(), "100%".to_string());
            rect.attributes
                .insert("fill".to_string(), background.clone());
            root.children.push(XMLNode::Element(rect));
        }
        for command in &self.commands {
            root.children
                .push(XMLNode::Element(command_element(command)));
        }

        let mut out = Vec::new();
        root.write_with_config(&mut out, EmitterConfig::new().perform_indent(true))
            .map_err(|e| BlocksError::Other(anyhow::anyhow!("failed to write SVG: {}", e)))?;
        String::from_utf8(out)
            .map_err(|e| BlocksError::Other(anyhow::anyhow!("SVG output is not UTF-8: {}", e)))
    }

    fn push(&mut self, shape: Shape) {
        self.commands.push(DrawCommand {
            shape,
            fill: self.fill.clone(),
            stroke: self.stroke.clone(),
            stroke_weight: self.stroke_weight,
        });
    }

    fn random(&mut self, args: &[Value]) -> f64 {
        let r = self.rng.next_f64_01();
        match args {
            [] => r,
            [max] => r * max.to_number(),
            [min, max, ..] => {
                let (min, max) = (min.to_number(), max.to_number());
                min + r * (max - min)
            }
        }
    }
}

impl Default for Sketch {
    fn default() -> Self {
        Self::new(SketchOptions::default())
    }
}

impl DrawingContext for Sketch {
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        if self.removed {
            return Err(RuntimeError::InstanceRemoved);
        }
        match name {
            "createCanvas" => {
                expect_args(name, args, 2)?;
                self.width = args[0].to_number();
                self.height = args[1].to_number();
                self.commands.clear();
                self.background = None;
            }
            "background" => {
                self.background = Some(colour_from_args(name, args)?);
                self.commands.clear();
            }
            "fill" => self.fill = Some(colour_from_args(name, args)?),
            "noFill" => self.fill = None,
            "stroke" => self.stroke = Some(colour_from_args(name, args)?),
            "noStroke" => self.stroke = None,
            "strokeWeight" => {
                expect_args(name, args, 1)?;
                self.stroke_weight = args[0].to_number();
            }
            "textSize" => {
                if args.is_empty() {
                    return Ok(Value::Number(self.text_size));
                }
                self.text_size = args[0].to_number();
            }
            "point" => {
                let n = numbers(name, args, 2)?;
                self.push(Shape::Point { x: n[0], y: n[1] });
            }
            "line" => {
                let n = numbers(name, args, 4)?;
                self.push(Shape::Line {
                    x1: n[0],
                    y1: n[1],
                    x2: n[2],
                    y2: n[3],
                });
            }
            "rect" => {
                let n = numbers(name, args, 3)?;
                self.push(Shape::Rect {
                    x: n[0],
                    y: n[1],
                    width: n[2],
                    height: n.get(3).copied().unwrap_or(n[2]),
                    radius: n.get(4).copied().unwrap_or(0.0),
                });
            }
            "ellipse" => {
                let n = numbers(name, args, 3)?;
                self.push(Shape::Ellipse {
                    cx: n[0],
                    cy: n[1],
                    width: n[2],
                    height: n.get(3).copied().unwrap_or(n[2]),
                });
            }
            "circle" => {
                let n = numbers(name, args, 3)?;
                self.push(Shape::Ellipse {
                    cx: n[0],
                    cy: n[1],
                    width: n[2],
                    height: n[2],
                });
            }
            "text" => {
                expect_args(name, args, 3)?;
                let text = args[0].to_string();
                let (x, y) = (args[1].to_number(), args[2].to_number());
                let size = self.text_size;
                self.push(Shape::Text { text, x, y, size });
            }
            "random" => return Ok(Value::Number(self.random(args))),
            "color" => return Ok(Value::Str(colour_from_args(name, args)?)),
            "storeItem" => {
                expect_args(name, args, 2)?;
                self.items.insert(args[0].to_string(), args[1].clone());
            }
            "getItem" => {
                expect_args(name, args, 1)?;
                return Ok(self
                    .items
                    .get(&args[0].to_string())
                    .cloned()
                    .unwrap_or(Value::Null));
            }
            "pixelDensity" => return Ok(Value::Number(1.0)),
            "abs" | "sqrt" | "floor" | "ceil" | "round" | "sin" | "cos" | "tan" | "asin"
            | "acos" | "atan" => {
                let x = numbers(name, args, 1)?[0];
                let y = match name {
                    "abs" => x.abs(),
                    "sqrt" => x.sqrt(),
                    "floor" => x.floor(),
                    "ceil" => x.ceil(),
                    "round" => (x + 0.5).floor(),
                    "sin" => x.sin(),
                    "cos" => x.cos(),
                    "tan" => x.tan(),
                    "asin" => x.asin(),
                    "acos" => x.acos(),
                    _ => x.atan(),
                };
                return Ok(Value::Number(y));
            }
            "constrain" => {
                let n = numbers(name, args, 3)?;
                return Ok(Value::Number(n[0].max(n[1]).min(n[2])));
            }
            "min" | "max" => {
                let n = numbers(name, args, 1)?;
                let folded = if name == "min" {
                    n.iter().copied().fold(f64::INFINITY, f64::min)
                } else {
                    n.iter().copied().fold(f64::NEG_INFINITY, f64::max)
                };
                return Ok(Value::Number(folded));
            }
            "remove" => self.remove(),
            _ => {
                return Err(RuntimeError::UnknownMember {
                    object: "p5".to_string(),
                    member: name.to_string(),
                })
            }
        }
        Ok(Value::Undefined)
    }

    fn get(&self, name: &str) -> Result<Value, RuntimeError> {
        let number = match name {
            "width" => self.width,
            "height" => self.height,
            "mouseX" => self.mouse.0,
            "mouseY" => self.mouse.1,
            "frameCount" => self.frame_count as f64,
            "displayWidth" | "windowWidth" => self.options.display_width,
            "displayHeight" | "windowHeight" => self.options.display_height,
            "PI" => std::f64::consts::PI,
            "HALF_PI" => std::f64::consts::FRAC_PI_2,
            "TWO_PI" => std::f64::consts::TAU,
            _ => return Ok(self.props.get(name).cloned().unwrap_or(Value::Undefined)),
        };
        Ok(Value::Number(number))
    }

    fn set(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        if is_system_variable(name) {
            return Err(RuntimeError::ReadOnly(name.to_string()));
        }
        self.props.insert(name.to_string(), value);
        Ok(())
    }

    fn begin_frame(&mut self) {
        self.frame_count += 1;
    }

    fn move_pointer(&mut self, x: f64, y: f64) {
        self.set_mouse(x, y);
    }

    fn remove(&mut self) {
        self.removed = true;
        self.props.clear();
        self.items.clear();
    }
}

fn is_system_variable(name: &str) -> bool {
    matches!(
        name,
        "width"
            | "height"
            | "mouseX"
            | "mouseY"
            | "frameCount"
            | "displayWidth"
            | "displayHeight"
            | "windowWidth"
            | "windowHeight"
            | "PI"
            | "HALF_PI"
            | "TWO_PI"
    )
}

fn expect_args(name: &str, args: &[Value], min: usize) -> Result<(), RuntimeError> {
    if args.len() < min {
        return Err(RuntimeError::Custom(format!(
            "{}() expects at least {} argument(s), got {}",
            name,
            min,
            args.len()
        )));
    }
    Ok(())
}

fn numbers(name: &str, args: &[Value], min: usize) -> Result<Vec<f64>, RuntimeError> {
    expect_args(name, args, min)?;
    Ok(args.iter().map(Value::to_number).collect())
}

/// p5 colour arguments: one grey level, an r/g/b triple (alpha ignored), or a CSS colour string.
fn colour_from_args(name: &str, args: &[Value]) -> Result<String, RuntimeError> {
    expect_args(name, args, 1)?;
    match args {
        [Value::Str(css), ..] => Ok(css.clone()),
        [grey] | [grey, _] => {
            let g = channel(grey);
            Ok(format!("#{:02x}{:02x}{:02x}", g, g, g))
        }
        [r, g, b, ..] => Ok(format!(
            "#{:02x}{:02x}{:02x}",
            channel(r),
            channel(g),
            channel(b)
        )),
        [] => Err(RuntimeError::Custom(format!("{}() expects a colour", name))),
    }
}

fn channel(value: &Value) -> u8 {
    let v = value.to_number();
    if v.is_nan() {
        0
    } else {
        v.round().clamp(0.0, 255.0) as u8
    }
}

fn command_element(command: &DrawCommand) -> Element {
    let mut attrs: Vec<(&str, String)> = Vec::new();
    let (tag, text) = match &command.shape {
        Shape::Point { x, y } => {
            let r = (command.stroke_weight / 2.0).max(0.5);
            attrs.push(("cx", format_num(*x)));
            attrs.push(("cy", format_num(*y)));
            attrs.push(("r", format_num(r)));
            attrs.push((
                "fill",
                command.stroke.clone().unwrap_or_else(|| "none".to_string()),
            ));
            ("circle", None)
        }
        Shape::Line { x1, y1, x2, y2 } => {
            attrs.push(("x1", format_num(*x1)));
            attrs.push(("y1", format_num(*y1)));
            attrs.push(("x2", format_num(*x2)));
            attrs.push(("y2", format_num(*y2)));
            ("line", None)
        }
        Shape::Rect {
            x,
            y,
            width,
            height,
            radius,
        } => {
            attrs.push(("x", format_num(*x)));
            attrs.push(("y", format_num(*y)));
            attrs.push(("width", format_num(*width)));
            attrs.push(("height", format_num(*height)));
            if *radius > 0.0 {
                attrs.push(("rx", format_num(*radius)));
            }
            ("rect", None)
        }
        Shape::Ellipse {
            cx,
            cy,
            width,
            height,
        } => {
            attrs.push(("cx", format_num(*cx)));
            attrs.push(("cy", format_num(*cy)));
            attrs.push(("rx", format_num(width / 2.0)));
            attrs.push(("ry", format_num(height / 2.0)));
            ("ellipse", None)
        }
        Shape::Text { text, x, y, size } => {
            attrs.push(("x", format_num(*x)));
            attrs.push(("y", format_num(*y)));
            attrs.push(("font-size", format_num(*size)));
            ("text", Some(text.clone()))
        }
    };

    let mut element = Element::new(tag);
    for (key, value) in attrs {
        element.attributes.insert(key.to_string(), value);
    }
    if !matches!(command.shape, Shape::Point { .. }) {
        element.attributes.insert(
            "fill".to_string(),
            command.fill.clone().unwrap_or_else(|| "none".to_string()),
        );
        match &command.stroke {
            Some(stroke) => {
                element
                    .attributes
                    .insert("stroke".to_string(), stroke.clone());
                element.attributes.insert(
                    "stroke-width".to_string(),
                    format_num(command.stroke_weight),
                );
            }
            None => {
                element
                    .attributes
                    .insert("stroke".to_string(), "none".to_string());
            }
        }
    }
    if let Some(text) = text {
        element.children.push(XMLNode::Text(text));
    }
    element
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn records_shapes_with_current_style() {
        let mut sketch = Sketch::default();
        sketch.call("createCanvas", &[num(200.0), num(150.0)]).unwrap();
        sketch.call("fill", &[num(255.0), num(0.0), num(0.0)]).unwrap();
        sketch.call("noStroke", &[]).unwrap();
        sketch
            .call("rect", &[num(10.0), num(20.0), num(30.0), num(40.0), num(5.0)])
            .unwrap();
        sketch.call("circle", &[num(50.0), num(50.0), num(10.0)]).unwrap();

        assert_eq!(sketch.size(), (200.0, 150.0));
        assert_eq!(sketch.commands().len(), 2);
        let rect = &sketch.commands()[0];
        assert_eq!(rect.fill.as_deref(), Some("#ff0000"));
        assert_eq!(rect.stroke, None);
        assert!(matches!(rect.shape, Shape::Rect { radius, .. } if radius == 5.0));
        assert!(matches!(
            sketch.commands()[1].shape,
            Shape::Ellipse { width, height, .. } if width == 10.0 && height == 10.0
        ));
    }

    #[test]
    fn background_clears_display_list() {
        let mut sketch = Sketch::default();
        sketch.call("point", &[num(1.0), num(2.0)]).unwrap();
        sketch.call("background", &[num(220.0)]).unwrap();
        assert!(sketch.commands().is_empty());
        assert_eq!(sketch.background(), Some("#dcdcdc"));
        sketch
            .call("background", &[Value::Str("#102030".to_string())])
            .unwrap();
        assert_eq!(sketch.background(), Some("#102030"));
    }

    #[test]
    fn system_variables_are_read_only() {
        let mut sketch = Sketch::default();
        sketch.set_mouse(12.0, 34.0);
        assert_eq!(sketch.get("mouseX").unwrap().to_number(), 12.0);
        assert_eq!(sketch.get("width").unwrap().to_number(), 100.0);
        assert_eq!(
            sketch.set("width", num(5.0)),
            Err(RuntimeError::ReadOnly("width".to_string()))
        );
        sketch.set("draw", Value::Null).unwrap();
        assert!(matches!(sketch.get("draw").unwrap(), Value::Null));
        assert!(matches!(sketch.get("nothing").unwrap(), Value::Undefined));
    }

    #[test]
    fn random_is_seeded() {
        let mut a = Sketch::new(SketchOptions {
            seed: 7,
            ..SketchOptions::default()
        });
        let mut b = Sketch::new(SketchOptions {
            seed: 7,
            ..SketchOptions::default()
        });
        for _ in 0..5 {
            let x = a.call("random", &[num(10.0), num(20.0)]).unwrap().to_number();
            let y = b.call("random", &[num(10.0), num(20.0)]).unwrap().to_number();
            assert_eq!(x, y);
            assert!((10.0..20.0).contains(&x));
        }
    }

    #[test]
    fn stored_items_round_trip() {
        let mut sketch = Sketch::default();
        sketch
            .call("storeItem", &[Value::Str("score".to_string()), num(3.0)])
            .unwrap();
        let value = sketch
            .call("getItem", &[Value::Str("score".to_string())])
            .unwrap();
        assert_eq!(value.to_number(), 3.0);
        assert!(matches!(
            sketch.call("getItem", &[Value::Str("missing".to_string())]).unwrap(),
            Value::Null
        ));
    }

    #[test]
    fn calls_fail_after_remove() {
        let mut sketch = Sketch::default();
        sketch.remove();
        assert!(sketch.is_removed());
        assert!(matches!(
            sketch.call("point", &[num(0.0), num(0.0)]),
            Err(RuntimeError::InstanceRemoved)
        ));
    }

    #[test]
    fn unknown_primitive_and_missing_args() {
        let mut sketch = Sketch::default();
        assert!(matches!(
            sketch.call("teapot", &[]),
            Err(RuntimeError::UnknownMember { .. })
        ));
        let err = sketch.call("line", &[num(1.0)]).unwrap_err();
        assert!(err.to_string().contains("line() expects at least 4"));
    }

    #[test]
    fn constrain_and_inverse_trig() {
        let mut sketch = Sketch::default();
        let clamped = sketch
            .call("constrain", &[num(150.0), num(0.0), num(100.0)])
            .unwrap();
        assert!(matches!(clamped, Value::Number(n) if n == 100.0));
        let low = sketch.call("constrain", &[num(-3.0), num(0.0), num(100.0)]).unwrap();
        assert!(matches!(low, Value::Number(n) if n == 0.0));
        let angle = sketch.call("atan", &[num(1.0)]).unwrap();
        assert!(matches!(angle, Value::Number(n) if (n - std::f64::consts::FRAC_PI_4).abs() < 1e-12));
        assert!(sketch.call("constrain", &[num(1.0)]).is_err());
    }

    #[test]
    fn svg_export_contains_shapes() {
        let mut sketch = Sketch::default();
        sketch.call("createCanvas", &[num(64.0), num(32.0)]).unwrap();
        sketch.call("background", &[num(0.0)]).unwrap();
        sketch.call("stroke", &[num(255.0)]).unwrap();
        sketch.call("point", &[num(3.0), num(4.0)]).unwrap();
        sketch
            .call("text", &[Value::Str("hi".to_string()), num(1.0), num(2.0)])
            .unwrap();
        let svg = sketch.to_svg().unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains(SVG_NS));
        assert!(svg.contains("viewBox=\"0 0 64 32\""));
        assert!(svg.contains("fill=\"#000000\""));
        assert!(svg.contains("<circle"));
        assert!(svg.contains("cx=\"3\""));
        assert!(svg.contains(">hi</text>"));
    }
}
