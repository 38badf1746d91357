use crate::error::{BlocksError, BlocksResult};
use crate::model::{BlockInstance, Fragment, Precedence};
use crate::schema::format_num;
use std::collections::HashMap;

/// Bare identifiers the p5 emitters produce. User variables never shadow these, and the default
/// rewrite table binds each of them to the drawing context.
pub const DRAWING_GLOBALS: &[&str] = &[
    "createCanvas",
    "background",
    "fill",
    "noFill",
    "stroke",
    "noStroke",
    "strokeWeight",
    "point",
    "line",
    "rect",
    "ellipse",
    "circle",
    "text",
    "textSize",
    "random",
    "color",
    "mouseX",
    "mouseY",
    "width",
    "height",
    "frameCount",
    "displayWidth",
    "displayHeight",
    "windowWidth",
    "windowHeight",
    "pixelDensity",
    "storeItem",
    "getItem",
    "sqrt",
    "abs",
    "round",
    "floor",
    "ceil",
    "sin",
    "cos",
    "tan",
    "asin",
    "acos",
    "atan",
    "constrain",
    "PI",
    "HALF_PI",
    "TWO_PI",
    "setup",
    "draw",
    "mousePressed",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Emitted {
    Statement(String),
    Expression(Fragment),
}

/// What an emitter may ask of the walker while it builds its own fragment.
pub trait SlotResolver {
    /// Code of the block plugged into value slot `slot`, parenthesised for a context of
    /// precedence `outer`. Returns `default` when nothing is plugged in.
    fn value(&mut self, slot: &str, outer: Precedence, default: &str) -> BlocksResult<String>;

    /// Indented code of the chain plugged into statement slot `slot`, or "" if empty.
    fn statement(&mut self, slot: &str) -> BlocksResult<String>;

    /// A variable name that collides with nothing else in the program.
    fn fresh_name(&mut self, base: &str) -> String;

    /// The identifier used in generated code for the workspace variable `name`.
    fn variable(&mut self, name: &str) -> String;
}

pub type EmitFn = fn(&BlockInstance, &mut dyn SlotResolver) -> BlocksResult<Emitted>;

#[derive(Clone)]
pub struct EmitterTable {
    emitters: HashMap<String, EmitFn>,
    reserved: Vec<String>,
}

impl EmitterTable {
    pub fn empty() -> Self {
        Self {
            emitters: HashMap::new(),
            reserved: Vec::new(),
        }
    }

    /// Emitters for the p5 vocabulary plus the standard math, text, logic, variable and loop
    /// blocks.
    pub fn p5() -> Self {
        let mut table = Self::empty();
        table.reserved = DRAWING_GLOBALS.iter().map(|s| s.to_string()).collect();
        table.reserve("p5");

        table.register("p5_setup", emit_setup);
        table.register("p5_draw", emit_draw);
        table.register("p5_mouse_pressed", emit_mouse_pressed);
        table.register("p5_create_canvas", emit_create_canvas);
        table.register("p5_background", emit_background);
        table.register("p5_fill", emit_fill);
        table.register("p5_no_fill", |_, _| Ok(call_stmt("noFill", &[])));
        table.register("p5_stroke", emit_stroke);
        table.register("p5_no_stroke", |_, _| Ok(call_stmt("noStroke", &[])));
        table.register("p5_stroke_weight", emit_stroke_weight);
        table.register("p5_point", emit_point);
        table.register("p5_line", emit_line);
        table.register("p5_rect", emit_rect);
        table.register("p5_ellipse", emit_ellipse);
        table.register("p5_text", emit_text);
        table.register("p5_text_size", emit_text_size);
        table.register("p5_mouse_x", |_, _| Ok(atom("mouseX")));
        table.register("p5_mouse_y", |_, _| Ok(atom("mouseY")));
        table.register("p5_width", |_, _| Ok(atom("width")));
        table.register("p5_height", |_, _| Ok(atom("height")));
        table.register("p5_frame_count", |_, _| Ok(atom("frameCount")));
        table.register("p5_sys_variable", emit_sys_variable);
        table.register("p5_set_variable", emit_store_item);
        table.register("p5_get_variable", emit_get_item);
        table.register("p5_random", emit_random);
        table.register("p5_color", emit_color);

        table.register("math_number", emit_math_number);
        table.register("math_arithmetic", emit_math_arithmetic);
        table.register("math_single", emit_math_single);
        table.register("math_round", emit_math_round);
        table.register("math_constant", emit_math_constant);
        table.register("math_random_int", emit_math_random_int);
        table.register("math_random_float", |_, _| Ok(call_expr("random", &[])));
        table.register("math_trig", emit_math_trig);
        table.register("math_modulo", emit_math_modulo);
        table.register("math_constrain", emit_math_constrain);
        table.register("text", emit_text_literal);
        table.register("colour_picker", emit_colour_picker);
        table.register("colour_random", emit_colour_random);
        table.register("colour_rgb", emit_colour_rgb);
        table.register("logic_boolean", emit_logic_boolean);
        table.register("logic_compare", emit_logic_compare);
        table.register("logic_operation", emit_logic_operation);
        table.register("logic_negate", emit_logic_negate);
        table.register("logic_null", |_, _| Ok(atom("null")));
        table.register("logic_ternary", emit_logic_ternary);
        table.register("variables_get", emit_variables_get);
        table.register("variables_set", emit_variables_set);
        table.register("controls_repeat_ext", emit_repeat);
        table.register("controls_if", emit_if);
        table.register("controls_ifelse", emit_if);
        table.register("controls_whileUntil", emit_while_until);
        table.register("controls_for", emit_for);
        table.register("controls_flow_statements", emit_flow_statement);
        table
    }

    pub fn register(&mut self, block_type: &str, emit: EmitFn) {
        self.emitters.insert(block_type.to_string(), emit);
    }

    pub fn get(&self, block_type: &str) -> Option<EmitFn> {
        self.emitters.get(block_type).copied()
    }

    pub fn reserve(&mut self, name: &str) {
        if !self.is_reserved(name) {
            self.reserved.push(name.to_string());
        }
    }

    /// Case-insensitive, matching the rewriter.
    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.iter().any(|r| r.eq_ignore_ascii_case(name))
    }
}

impl Default for EmitterTable {
    fn default() -> Self {
        Self::p5()
    }
}

fn atom(code: &str) -> Emitted {
    Emitted::Expression(Fragment::atomic(code))
}

fn call_stmt(name: &str, args: &[String]) -> Emitted {
    Emitted::Statement(format!("{}({});\n", name, args.join(", ")))
}

fn call_expr(name: &str, args: &[String]) -> Emitted {
    Emitted::Expression(Fragment::new(
        format!("{}({})", name, args.join(", ")),
        Precedence::FunctionCall,
    ))
}

fn args(
    resolve: &mut dyn SlotResolver,
    slots: &[(&str, &str)],
) -> BlocksResult<Vec<String>> {
    slots
        .iter()
        .map(|(slot, default)| resolve.value(slot, Precedence::None, default))
        .collect()
}

fn number_field(block: &BlockInstance, name: &str, default: f64) -> BlocksResult<String> {
    let Some(raw) = block.field(name) else {
        return Ok(format_num(default));
    };
    let value = raw.trim().parse::<f64>().map_err(|_| {
        BlocksError::document(format!(
            "field '{}' of block '{}' is not a number: '{}'",
            name, block.id, raw
        ))
    })?;
    if !value.is_finite() {
        return Err(BlocksError::document(format!(
            "field '{}' of block '{}' is not finite",
            name, block.id
        )));
    }
    Ok(format_num(value))
}

/// Single-quoted string literal.
pub fn quote_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

fn is_number_literal(code: &str) -> bool {
    code.parse::<f64>().is_ok_and(f64::is_finite)
}

fn emit_hook(name: &str, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let body = resolve.statement("statements")?;
    Ok(Emitted::Statement(format!("{} = function() {{\n{}}};\n", name, body)))
}

fn emit_setup(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    emit_hook("setup", resolve)
}

fn emit_draw(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    emit_hook("draw", resolve)
}

fn emit_mouse_pressed(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    emit_hook("mousePressed", resolve)
}

fn emit_create_canvas(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let slots = [("width", "400"), ("height", "400")];
    Ok(call_stmt("createCanvas", &args(resolve, &slots)?))
}

fn emit_background(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    Ok(call_stmt("background", &args(resolve, &[("NAME", "255")])?))
}

fn emit_fill(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    Ok(call_stmt("fill", &args(resolve, &[("colour", "255")])?))
}

fn emit_stroke(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    Ok(call_stmt("stroke", &args(resolve, &[("colour", "0")])?))
}

fn emit_stroke_weight(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    Ok(call_stmt("strokeWeight", &args(resolve, &[("weight", "1")])?))
}

fn emit_point(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    Ok(call_stmt("point", &args(resolve, &[("x", "0"), ("y", "0")])?))
}

fn emit_line(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let slots = [("x1", "0"), ("y1", "0"), ("x2", "0"), ("y2", "0")];
    Ok(call_stmt("line", &args(resolve, &slots)?))
}

fn emit_rect(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let slots = [
        ("x", "0"),
        ("y", "0"),
        ("width", "0"),
        ("height", "0"),
        ("round", "0"),
    ];
    Ok(call_stmt("rect", &args(resolve, &slots)?))
}

fn emit_ellipse(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let slots = [("x", "0"), ("y", "0"), ("width", "0"), ("height", "0")];
    Ok(call_stmt("ellipse", &args(resolve, &slots)?))
}

fn emit_text(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let slots = [("message", "''"), ("x", "0"), ("y", "0")];
    Ok(call_stmt("text", &args(resolve, &slots)?))
}

fn emit_text_size(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    Ok(call_stmt("textSize", &args(resolve, &[("size", "12")])?))
}

fn emit_sys_variable(block: &BlockInstance, _: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    match block.field("SysVarName").unwrap_or("frameCount") {
        "pixelDensity" => Ok(call_expr("pixelDensity", &[])),
        name @ ("frameCount" | "mouseX" | "mouseY" | "width" | "height" | "displayWidth"
        | "displayHeight" | "windowWidth" | "windowHeight") => Ok(atom(name)),
        other => Err(BlocksError::document(format!(
            "unknown system variable '{}' on block '{}'",
            other, block.id
        ))),
    }
}

/// Named state shared between hooks lives in the drawing context, not in script variables.
fn emit_store_item(block: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let key = quote_string(block.field("NAME").unwrap_or("Name"));
    let value = resolve.value("VALUE", Precedence::None, "null")?;
    Ok(call_stmt("storeItem", &[key, value]))
}

fn emit_get_item(block: &BlockInstance, _: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let key = quote_string(block.field("NAME").unwrap_or("default"));
    Ok(call_expr("getItem", &[key]))
}

fn emit_random(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    Ok(call_expr("random", &args(resolve, &[("min", "0"), ("max", "1")])?))
}

fn emit_color(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let slots = [("red", "0"), ("green", "0"), ("blue", "0")];
    Ok(call_expr("color", &args(resolve, &slots)?))
}

fn emit_math_number(block: &BlockInstance, _: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let code = number_field(block, "NUM", 0.0)?;
    let precedence = if code.starts_with('-') {
        Precedence::Unary
    } else {
        Precedence::Atomic
    };
    Ok(Emitted::Expression(Fragment::new(code, precedence)))
}

fn emit_math_arithmetic(
    block: &BlockInstance,
    resolve: &mut dyn SlotResolver,
) -> BlocksResult<Emitted> {
    let (op, precedence) = match block.field("OP").unwrap_or("ADD") {
        "ADD" => ("+", Precedence::Additive),
        "MINUS" => ("-", Precedence::Additive),
        "MULTIPLY" => ("*", Precedence::Multiplicative),
        "DIVIDE" => ("/", Precedence::Multiplicative),
        "MODULO" => ("%", Precedence::Multiplicative),
        other => {
            return Err(BlocksError::document(format!(
                "unknown arithmetic operator '{}' on block '{}'",
                other, block.id
            )))
        }
    };
    let a = resolve.value("A", precedence, "0")?;
    let b = resolve.value("B", precedence, "0")?;
    Ok(Emitted::Expression(Fragment::new(
        format!("{} {} {}", a, op, b),
        precedence,
    )))
}

fn emit_math_single(block: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let func = match block.field("OP").unwrap_or("ROOT") {
        "ROOT" => "sqrt",
        "ABS" => "abs",
        "NEG" => {
            let operand = resolve.value("NUM", Precedence::Unary, "0")?;
            // "- -x" would lex as a decrement
            let code = if operand.starts_with('-') {
                format!("-({})", operand)
            } else {
                format!("-{}", operand)
            };
            return Ok(Emitted::Expression(Fragment::new(code, Precedence::Unary)));
        }
        other => {
            return Err(BlocksError::document(format!(
                "unknown math function '{}' on block '{}'",
                other, block.id
            )))
        }
    };
    Ok(call_expr(func, &args(resolve, &[("NUM", "0")])?))
}

fn emit_math_round(block: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let func = match block.field("OP").unwrap_or("ROUND") {
        "ROUND" => "round",
        "ROUNDUP" => "ceil",
        "ROUNDDOWN" => "floor",
        other => {
            return Err(BlocksError::document(format!(
                "unknown rounding mode '{}' on block '{}'",
                other, block.id
            )))
        }
    };
    Ok(call_expr(func, &args(resolve, &[("NUM", "0")])?))
}

fn emit_math_constant(block: &BlockInstance, _: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    match block.field("CONSTANT").unwrap_or("PI") {
        name @ ("PI" | "HALF_PI" | "TWO_PI") => Ok(atom(name)),
        other => Err(BlocksError::document(format!(
            "unknown constant '{}' on block '{}'",
            other, block.id
        ))),
    }
}

fn emit_math_random_int(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let from = resolve.value("FROM", Precedence::None, "0")?;
    let to = resolve.value("TO", Precedence::Additive, "100")?;
    Ok(call_expr("floor", &[format!("random({}, {} + 1)", from, to)]))
}

/// Angles on the trig blocks are in degrees.
fn emit_math_trig(block: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    match block.field("OP").unwrap_or("SIN") {
        func @ ("SIN" | "COS" | "TAN") => {
            let angle = resolve.value("NUM", Precedence::Multiplicative, "0")?;
            let radians = format!("{} / 180 * PI", angle);
            Ok(call_expr(&func.to_ascii_lowercase(), &[radians]))
        }
        func @ ("ASIN" | "ACOS" | "ATAN") => {
            let ratio = resolve.value("NUM", Precedence::None, "0")?;
            Ok(Emitted::Expression(Fragment::new(
                format!("{}({}) / PI * 180", func.to_ascii_lowercase(), ratio),
                Precedence::Multiplicative,
            )))
        }
        other => Err(BlocksError::document(format!(
            "unknown trig function '{}' on block '{}'",
            other, block.id
        ))),
    }
}

fn emit_math_modulo(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let dividend = resolve.value("DIVIDEND", Precedence::Multiplicative, "0")?;
    let divisor = resolve.value("DIVISOR", Precedence::Multiplicative, "0")?;
    Ok(Emitted::Expression(Fragment::new(
        format!("{} % {}", dividend, divisor),
        Precedence::Multiplicative,
    )))
}

fn emit_math_constrain(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let slots = [("VALUE", "0"), ("LOW", "0"), ("HIGH", "100")];
    Ok(call_expr("constrain", &args(resolve, &slots)?))
}

fn emit_text_literal(block: &BlockInstance, _: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    Ok(atom(&quote_string(block.field("TEXT").unwrap_or(""))))
}

fn emit_colour_picker(block: &BlockInstance, _: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    Ok(atom(&quote_string(block.field("COLOUR").unwrap_or("#ff0000"))))
}

fn emit_colour_random(_: &BlockInstance, _: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let channel = "floor(random(256))".to_string();
    Ok(call_expr("color", &[channel.clone(), channel.clone(), channel]))
}

fn emit_colour_rgb(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let slots = [("RED", "0"), ("GREEN", "0"), ("BLUE", "0")];
    Ok(call_expr("color", &args(resolve, &slots)?))
}

fn emit_logic_boolean(block: &BlockInstance, _: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let code = if block.field("BOOL") == Some("FALSE") {
        "false"
    } else {
        "true"
    };
    Ok(atom(code))
}

fn emit_logic_compare(
    block: &BlockInstance,
    resolve: &mut dyn SlotResolver,
) -> BlocksResult<Emitted> {
    let (op, precedence) = match block.field("OP").unwrap_or("EQ") {
        "EQ" => ("==", Precedence::Equality),
        "NEQ" => ("!=", Precedence::Equality),
        "LT" => ("<", Precedence::Relational),
        "LTE" => ("<=", Precedence::Relational),
        "GT" => (">", Precedence::Relational),
        "GTE" => (">=", Precedence::Relational),
        other => {
            return Err(BlocksError::document(format!(
                "unknown comparison '{}' on block '{}'",
                other, block.id
            )))
        }
    };
    let a = resolve.value("A", precedence, "0")?;
    let b = resolve.value("B", precedence, "0")?;
    Ok(Emitted::Expression(Fragment::new(
        format!("{} {} {}", a, op, b),
        precedence,
    )))
}

fn emit_logic_operation(
    block: &BlockInstance,
    resolve: &mut dyn SlotResolver,
) -> BlocksResult<Emitted> {
    let (op, precedence) = match block.field("OP").unwrap_or("AND") {
        "AND" => ("&&", Precedence::LogicalAnd),
        "OR" => ("||", Precedence::LogicalOr),
        other => {
            return Err(BlocksError::document(format!(
                "unknown logic operator '{}' on block '{}'",
                other, block.id
            )))
        }
    };
    let a = resolve.value("A", precedence, "false")?;
    let b = resolve.value("B", precedence, "false")?;
    Ok(Emitted::Expression(Fragment::new(
        format!("{} {} {}", a, op, b),
        precedence,
    )))
}

fn emit_logic_negate(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let operand = resolve.value("BOOL", Precedence::Unary, "true")?;
    Ok(Emitted::Expression(Fragment::new(
        format!("!{}", operand),
        Precedence::Unary,
    )))
}

fn emit_logic_ternary(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let condition = resolve.value("IF", Precedence::Conditional, "false")?;
    let then_value = resolve.value("THEN", Precedence::Conditional, "null")?;
    let else_value = resolve.value("ELSE", Precedence::Conditional, "null")?;
    Ok(Emitted::Expression(Fragment::new(
        format!("{} ? {} : {}", condition, then_value, else_value),
        Precedence::Conditional,
    )))
}

fn emit_variables_get(
    block: &BlockInstance,
    resolve: &mut dyn SlotResolver,
) -> BlocksResult<Emitted> {
    let name = resolve.variable(block.field("VAR").unwrap_or("item"));
    Ok(atom(&name))
}

fn emit_variables_set(
    block: &BlockInstance,
    resolve: &mut dyn SlotResolver,
) -> BlocksResult<Emitted> {
    let name = resolve.variable(block.field("VAR").unwrap_or("item"));
    let value = resolve.value("VALUE", Precedence::Assignment, "0")?;
    Ok(Emitted::Statement(format!("{} = {};\n", name, value)))
}

fn emit_repeat(_: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let times = resolve.value("TIMES", Precedence::Assignment, "0")?;
    let body = resolve.statement("DO")?;
    let counter = resolve.fresh_name("count");
    let mut code = String::new();
    let limit = if is_number_literal(&times) || is_plain_identifier(&times) {
        times
    } else {
        let limit = resolve.fresh_name(&format!("{}_end", counter));
        code.push_str(&format!("var {} = {};\n", limit, times));
        limit
    };
    code.push_str(&format!(
        "for (var {c} = 0; {c} < {limit}; {c}++) {{\n{body}}}\n",
        c = counter,
        limit = limit,
        body = body
    ));
    Ok(Emitted::Statement(code))
}

fn emit_if(block: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let condition = resolve.value("IF0", Precedence::None, "false")?;
    let then_body = resolve.statement("DO0")?;
    let mut code = format!("if ({}) {{\n{}}}", condition, then_body);
    if block.block_type == "controls_ifelse" {
        let else_body = resolve.statement("ELSE")?;
        code.push_str(&format!(" else {{\n{}}}", else_body));
    }
    code.push('\n');
    Ok(Emitted::Statement(code))
}

fn emit_while_until(
    block: &BlockInstance,
    resolve: &mut dyn SlotResolver,
) -> BlocksResult<Emitted> {
    let until = block.field("MODE") == Some("UNTIL");
    let condition = if until {
        format!("!{}", resolve.value("BOOL", Precedence::Unary, "false")?)
    } else {
        resolve.value("BOOL", Precedence::None, "false")?
    };
    let body = resolve.statement("DO")?;
    Ok(Emitted::Statement(format!(
        "while ({}) {{\n{}}}\n",
        condition, body
    )))
}

fn emit_for(block: &BlockInstance, resolve: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    let var = resolve.variable(block.field("VAR").unwrap_or("i"));
    let from = resolve.value("FROM", Precedence::Assignment, "0")?;
    let to = resolve.value("TO", Precedence::Assignment, "0")?;
    let by = resolve.value("BY", Precedence::Assignment, "1")?;
    let body = resolve.statement("DO")?;

    let literals = (from.parse::<f64>(), to.parse::<f64>(), by.parse::<f64>());
    let header = if let (Ok(start), Ok(end), Ok(step)) = literals {
        let up = start <= end;
        let step = step.abs();
        let update = if step == 1.0 {
            format!("{}{}", var, if up { "++" } else { "--" })
        } else {
            format!("{} {} {}", var, if up { "+=" } else { "-=" }, format_num(step))
        };
        format!(
            "{v} = {from}; {v} {cmp} {to}; {update}",
            v = var,
            from = from,
            cmp = if up { "<=" } else { ">=" },
            to = to,
            update = update
        )
    } else {
        format!("{v} = {from}; {v} <= {to}; {v} += {by}", v = var, from = from, to = to, by = by)
    };
    Ok(Emitted::Statement(format!("for ({}) {{\n{}}}\n", header, body)))
}

fn emit_flow_statement(block: &BlockInstance, _: &mut dyn SlotResolver) -> BlocksResult<Emitted> {
    match block.field("FLOW").unwrap_or("BREAK") {
        "BREAK" => Ok(Emitted::Statement("break;\n".to_string())),
        "CONTINUE" => Ok(Emitted::Statement("continue;\n".to_string())),
        other => Err(BlocksError::document(format!(
            "unknown loop flow '{}' on block '{}'",
            other, block.id
        ))),
    }
}

fn is_plain_identifier(code: &str) -> bool {
    let mut chars = code.chars();
    chars
        .next()
        .is_some_and(crate::lexer::is_ident_start)
        && chars.all(crate::lexer::is_ident_part)
}
