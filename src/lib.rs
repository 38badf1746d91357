pub mod ast;
pub mod codegen;
pub mod document;
pub mod error;
pub mod executor;
pub mod interp;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod rewriter;
pub mod schema;
pub mod sketch;
pub mod walker;

#[cfg(not(target_arch = "wasm32"))]
pub mod bundle;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

#[cfg(all(target_arch = "wasm32", feature = "wasm-bindings"))]
pub mod wasm;

use error::BlocksResult;
use executor::{Mount, ScriptExecutor};
use model::Program;
use rewriter::RuleTable;
use schema::SchemaRegistry;
use sketch::{ContextHandle, Sketch, SketchOptions};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use walker::GeneratorOptions;

#[cfg(not(target_arch = "wasm32"))]
use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub frames: u64,
    pub sketch: SketchOptions,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            frames: 1,
            sketch: SketchOptions::default(),
        }
    }
}

/// Loads a workspace document and checks it against the built-in block definitions.
pub fn load_program(xml: &str) -> BlocksResult<Program> {
    let registry = SchemaRegistry::builtin()?;
    load_program_with(xml, &registry)
}

pub fn load_program_with(xml: &str, registry: &SchemaRegistry) -> BlocksResult<Program> {
    let program = document::load_xml(xml)?;
    program.validate_against(registry)?;
    Ok(program)
}

/// Document to runnable code with the default emitters and the `p5` rule table.
pub fn generate_code(xml: &str) -> BlocksResult<String> {
    let program = load_program(xml)?;
    let code = walker::generate(&program, &GeneratorOptions::default())?;
    Ok(RuleTable::p5().apply(&code))
}

/// Runs rewritten `code` on a fresh recording sketch for `options.frames` frames, then tears
/// the instance down. The sketch keeps its display list.
pub fn run_sketch(
    code: &str,
    binding: &str,
    options: &RunOptions,
) -> BlocksResult<Rc<RefCell<Sketch>>> {
    let sketch = Rc::new(RefCell::new(Sketch::new(options.sketch)));
    let handle: ContextHandle = sketch.clone();
    let mut mount = Mount::new(ScriptExecutor::new(binding));
    let instance = mount.run(code, move || handle)?;
    instance.advance(options.frames)?;
    mount.stop();
    Ok(sketch)
}

pub fn render_document_svg(xml: &str, options: &RunOptions) -> BlocksResult<String> {
    let code = generate_code(xml)?;
    let sketch = run_sketch(&code, "p5", options)?;
    let svg = sketch.borrow().to_svg()?;
    Ok(svg)
}

#[cfg(not(target_arch = "wasm32"))]
pub fn run_cli(args: &cli::Args) -> Result<()> {
    let registry = SchemaRegistry::builtin()?;
    if args.list_blocks {
        let mut names = registry.names().collect::<Vec<_>>();
        names.sort_unstable();
        for name in names {
            println!("{}", name);
        }
        return Ok(());
    }

    let Some(input) = &args.input else {
        anyhow::bail!("INPUT is required unless --list-blocks is given.");
    };
    if args.raw && args.svg.is_some() {
        anyhow::bail!("--svg cannot be used with --raw (raw code has no drawing-context binding).");
    }

    let total_stages = 3
        + usize::from(!args.raw)
        + usize::from(args.svg.is_some())
        + usize::from(args.save_document.is_some())
        + usize::from(args.bundle.is_some());
    let progress = CliProgress::new("Generate", total_stages);
    let mut stage = 0usize;

    stage += 1;
    progress.emit(stage, "Resolving input path");
    let input = canonicalize_file(input)?;

    stage += 1;
    progress.emit(stage, "Loading workspace");
    let xml = read_workspace(&input)?;
    let program = load_program_with(&xml, &registry)
        .with_context(|| format!("Invalid workspace '{}'.", input.display()))?;

    stage += 1;
    progress.emit(stage, "Generating code");
    let options = GeneratorOptions {
        slot_policy: if args.strict_slots {
            walker::UnresolvedSlotPolicy::Fail
        } else {
            walker::UnresolvedSlotPolicy::Fill
        },
        ..GeneratorOptions::default()
    };
    let mut code = walker::generate(&program, &options)?;

    if !args.raw {
        stage += 1;
        progress.emit(stage, "Rewriting drawing globals");
        let rules = match &args.rules {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read '{}'.", path.display()))?;
                RuleTable::from_json(&text)?
            }
            None => RuleTable::bind_to(&args.binding)?,
        };
        code = rules.apply(&code);
    }

    let mut preview = None;
    if let Some(svg_path) = &args.svg {
        stage += 1;
        progress.emit(stage, "Running sketch");
        let mut run_options = RunOptions {
            frames: args.frames,
            ..RunOptions::default()
        };
        if let Some(seed) = args.seed {
            run_options.sketch.seed = seed;
        }
        let sketch = run_sketch(&code, &args.binding, &run_options)?;
        let svg = sketch.borrow().to_svg()?;
        write_text(svg_path, &svg)?;
        preview = Some(svg);
    }

    if let Some(path) = &args.save_document {
        stage += 1;
        progress.emit(stage, "Writing workspace document");
        write_text(path, &document::save_xml(&program)?)?;
    }

    if let Some(path) = &args.bundle {
        stage += 1;
        progress.emit(stage, "Writing sketch bundle");
        let bundle = bundle::SketchBundle {
            workspace_xml: document::save_xml(&program)?,
            code: code.clone(),
            binding: args.binding.clone(),
            preview_svg: preview,
        };
        bundle::write_bundle_file(&bundle, path)?;
    }

    match &args.output {
        Some(path) => write_text(path, &code)?,
        None => print!("{}", code),
    }
    Ok(())
}

/// Reads workspace XML from a document, or from the `workspace.xml` entry of a bundle.
#[cfg(not(target_arch = "wasm32"))]
pub fn read_workspace(path: &Path) -> Result<String> {
    let is_bundle = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
    if is_bundle {
        return Ok(bundle::read_bundle_file(path)?.workspace_xml);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read '{}'.", path.display()))
}

#[cfg(not(target_arch = "wasm32"))]
fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text).with_context(|| format!("Failed to write '{}'.", path.display()))
}

pub fn canonicalize_file(path: &Path) -> anyhow::Result<PathBuf> {
    if !path.exists() || !path.is_file() {
        return Err(anyhow::anyhow!("Input file not found: '{}'.", path.display()));
    }
    Ok(path.canonicalize()?)
}

#[cfg(not(target_arch = "wasm32"))]
struct CliProgress {
    prefix: &'static str,
    total: usize,
}

#[cfg(not(target_arch = "wasm32"))]
impl CliProgress {
    fn new(prefix: &'static str, total: usize) -> Self {
        Self {
            prefix,
            total: total.max(1),
        }
    }

    fn emit(&self, step: usize, label: &str) {
        let step = step.clamp(1, self.total);
        let bar = render_progress_bar(step, self.total, 14);
        eprintln!(
            "[{}] {}... ({}/{}) {}",
            self.prefix, label, step, self.total, bar
        );
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn render_progress_bar(step: usize, total: usize, width: usize) -> String {
    let width = width.max(1);
    let filled = ((step * width) + (total / 2)) / total;
    let mut s = String::with_capacity(width + 2);
    s.push('[');
    for i in 0..width {
        s.push(if i < filled { '=' } else { '-' });
    }
    s.push(']');
    s
}
