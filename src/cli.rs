use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sketchblocks-rs",
    about = "Compile Blockly sketch workspaces to p5-style code, run them, and render SVG previews."
)]
pub struct Args {
    #[arg(value_name = "INPUT", help = "Workspace .xml document or .zip sketch bundle.")]
    pub input: Option<PathBuf>,

    #[arg(
        value_name = "OUTPUT",
        help = "Write generated code to this path (stdout when omitted)."
    )]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Skip rewriting; emit code with bare drawing globals.")]
    pub raw: bool,

    #[arg(long, value_name = "JSON", help = "Rewrite with the rule table in this JSON file.")]
    pub rules: Option<PathBuf>,

    #[arg(
        long,
        default_value = "p5",
        help = "Name of the drawing-context binding generated code is rewritten against."
    )]
    pub binding: String,

    #[arg(long, help = "Fail on unconnected value inputs instead of using defaults.")]
    pub strict_slots: bool,

    #[arg(long, value_name = "PATH", help = "Run the sketch and write the final canvas as SVG.")]
    pub svg: Option<PathBuf>,

    #[arg(long, default_value_t = 1, help = "Number of draw frames to run before rendering.")]
    pub frames: u64,

    #[arg(long, help = "Seed for random().")]
    pub seed: Option<u64>,

    #[arg(long, value_name = "PATH", help = "Re-serialise the loaded workspace to this path.")]
    pub save_document: Option<PathBuf>,

    #[arg(long, value_name = "PATH", help = "Write a .zip bundle of workspace, code and preview.")]
    pub bundle: Option<PathBuf>,

    #[arg(long, help = "List the available block types and exit.")]
    pub list_blocks: bool,

    #[arg(short, long, help = "Enable debug logging (RUST_LOG takes precedence).")]
    pub verbose: bool,
}
