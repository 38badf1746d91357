use crate::document::load_xml;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::ZipArchive;

const BUNDLE_FORMAT: &str = "sketchbundle";
const BUNDLE_VERSION: u64 = 1;

/// A saved sketch: the workspace it came from, the code generated from it and, optionally, a
/// rendered preview.
#[derive(Debug, Clone, PartialEq)]
pub struct SketchBundle {
    pub workspace_xml: String,
    pub code: String,
    pub binding: String,
    pub preview_svg: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format: String,
    version: u64,
    binding: String,
    block_count: usize,
    #[serde(default)]
    has_preview: bool,
}

pub fn write_bundle_file(bundle: &SketchBundle, output_path: &Path) -> Result<()> {
    let bytes = build_bundle_bytes(bundle)?;
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output_path, bytes)
        .with_context(|| format!("Failed to write '{}'.", output_path.display()))?;
    Ok(())
}

pub fn build_bundle_bytes(bundle: &SketchBundle) -> Result<Vec<u8>> {
    let program = load_xml(&bundle.workspace_xml).context("Bundle workspace is invalid.")?;
    let manifest = Manifest {
        format: BUNDLE_FORMAT.to_string(),
        version: BUNDLE_VERSION,
        binding: bundle.binding.clone(),
        block_count: program.len(),
        has_preview: bundle.preview_svg.is_some(),
    };

    let mut out = Cursor::new(Vec::<u8>::new());
    let mut zip = zip::ZipWriter::new(&mut out);
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file("manifest.json", opts)?;
    zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;

    zip.start_file("workspace.xml", opts)?;
    zip.write_all(bundle.workspace_xml.as_bytes())?;

    zip.start_file("sketch.js", opts)?;
    zip.write_all(bundle.code.as_bytes())?;

    if let Some(svg) = &bundle.preview_svg {
        zip.start_file("preview.svg", opts)?;
        zip.write_all(svg.as_bytes())?;
    }

    zip.finish()?;
    Ok(out.into_inner())
}

pub fn read_bundle_file(path: &Path) -> Result<SketchBundle> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read '{}'.", path.display()))?;
    read_bundle_bytes(&bytes)
}

pub fn read_bundle_bytes(bytes: &[u8]) -> Result<SketchBundle> {
    let mut zip = ZipArchive::new(Cursor::new(bytes))
        .map_err(|_| anyhow!("Input is not a valid sketch bundle."))?;

    let manifest_text = read_zip_entry_text(&mut zip, "manifest.json")?;
    let manifest: Manifest =
        serde_json::from_str(&manifest_text).context("Invalid manifest.json in sketch bundle.")?;
    if manifest.format != BUNDLE_FORMAT {
        bail!("Invalid sketch bundle format '{}'.", manifest.format);
    }
    if manifest.version != BUNDLE_VERSION {
        bail!(
            "Unsupported sketch bundle version {} (expected {}).",
            manifest.version,
            BUNDLE_VERSION
        );
    }

    let workspace_xml = read_zip_entry_text(&mut zip, "workspace.xml")?;
    let code = read_zip_entry_text(&mut zip, "sketch.js")?;
    let preview_svg = if manifest.has_preview {
        Some(read_zip_entry_text(&mut zip, "preview.svg")?)
    } else {
        None
    };

    let program = load_xml(&workspace_xml).context("Invalid workspace.xml in sketch bundle.")?;
    if program.len() != manifest.block_count {
        bail!(
            "Sketch bundle mismatch: workspace has {} blocks, manifest records {}.",
            program.len(),
            manifest.block_count
        );
    }

    Ok(SketchBundle {
        workspace_xml,
        code,
        binding: manifest.binding,
        preview_svg,
    })
}

fn read_zip_entry_text<R: Read + std::io::Seek>(
    zip: &mut ZipArchive<R>,
    name: &str,
) -> Result<String> {
    let mut entry = zip
        .by_name(name)
        .with_context(|| format!("Missing '{}' in sketch bundle.", name))?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .with_context(|| format!("Failed reading '{}' from sketch bundle.", name))?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKSPACE: &str = r#"<xml xmlns="https://developers.google.com/blockly/xml"><block type="p5_no_fill" id="a"><next><block type="p5_no_stroke" id="b"/></next></block></xml>"#;

    fn bundle(preview: Option<&str>) -> SketchBundle {
        SketchBundle {
            workspace_xml: WORKSPACE.to_string(),
            code: "p5.noFill();\np5.noStroke();\n".to_string(),
            binding: "p5".to_string(),
            preview_svg: preview.map(str::to_string),
        }
    }

    #[test]
    fn bundle_bytes_read_back() {
        let original = bundle(Some("<svg/>"));
        let bytes = build_bundle_bytes(&original).unwrap();
        assert_eq!(read_bundle_bytes(&bytes).unwrap(), original);

        let plain = bundle(None);
        let bytes = build_bundle_bytes(&plain).unwrap();
        assert_eq!(read_bundle_bytes(&bytes).unwrap().preview_svg, None);
    }

    #[test]
    fn rejects_non_archives_and_wrong_format() {
        let err = read_bundle_bytes(b"not a zip").unwrap_err();
        assert!(err.to_string().contains("not a valid sketch bundle"));

        let mut out = Cursor::new(Vec::<u8>::new());
        {
            let mut zip = zip::ZipWriter::new(&mut out);
            let opts = SimpleFileOptions::default();
            zip.start_file("manifest.json", opts).unwrap();
            zip.write_all(
                br#"{"format": "sketchbundle", "version": 9, "binding": "p5", "block_count": 0}"#,
            )
            .unwrap();
            zip.finish().unwrap();
        }
        let err = read_bundle_bytes(&out.into_inner()).unwrap_err();
        assert!(err.to_string().contains("Unsupported sketch bundle version 9"));
    }

    #[test]
    fn refuses_to_bundle_invalid_workspace() {
        let mut broken = bundle(None);
        broken.workspace_xml = "<xml><block/></xml>".to_string();
        assert!(build_bundle_bytes(&broken).is_err());
    }
}
