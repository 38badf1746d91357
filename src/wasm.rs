use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub fn generate_sketch_code(xml: &str) -> Result<String, JsValue> {
    crate::generate_code(xml).map_err(|e| JsValue::from_str(&e.to_string()))
}

#[wasm_bindgen]
pub fn render_sketch_svg(xml: &str, frames: u32) -> Result<String, JsValue> {
    let options = crate::RunOptions {
        frames: u64::from(frames),
        ..crate::RunOptions::default()
    };
    crate::render_document_svg(xml, &options).map_err(|e| JsValue::from_str(&e.to_string()))
}
