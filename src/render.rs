use std::sync::Arc;
use tiny_skia::Pixmap;
use usvg::{Tree, fontdb};

use crate::errors::{MapError, Result};

pub fn usvg_options() -> usvg::Options<'static> {
    let mut fontdb = fontdb::Database::new();
    fontdb.load_system_fonts();
    let mut options = usvg::Options::default();
    options.fontdb = Arc::new(fontdb);
    options
}

pub fn svg_to_png(svg: &str, opt: &usvg::Options) -> Result<Vec<u8>> {
    let tree = Tree::from_str(svg, opt).map_err(|e| MapError::Render(e.to_string()))?;

    let pixmap_size = tree.size();
    let mut pixmap = Pixmap::new(pixmap_size.width() as u32, pixmap_size.height() as u32)
        .ok_or_else(|| MapError::Render(format!("invalid map size {:?}", pixmap_size)))?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    pixmap.encode_png().map_err(|e| MapError::Render(e.to_string()))
}
