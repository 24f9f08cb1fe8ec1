//! `lopdf` implementation of the document builder traits.
//!
//! Each page gets one content stream:
//!
//! ```text
//! q  w 0 0 h 0 0 cm  /Im0 Do  Q                      background, stretched
//! q  /GS0 gs                                          ca = CA = alpha
//!    BT /F1 size Tf 1 0 0 1 x y Tm <code> Tj ET       one per glyph
//! Q
//! ```
//!
//! JPEG renders are embedded untouched with `DCTDecode`; anything else is
//! decoded with `image` and stored as Flate RGB, plus a Flate `SMask` when
//! the raster carries alpha. A render that cannot be decoded is logged and
//! the page keeps only its size and text layer.
//!
//! The overlay font is a single `Type0` resource shared by every page.
//! Its object id is reserved on first use and the font objects are written in
//! [`DocumentBuilder::finalize`], once the full set of glyphs is known:
//!
//! - TrueType: `CIDFontType2`, `Identity-H`, `CIDToGIDMap /Identity`, with
//!   `/W` widths and a `ToUnicode` CMap covering the glyphs actually used.
//! - Built-in: `CIDFontType0` `HYSMyeongJo-Medium` with `UniKS-UCS2-H`.
//!   Characters outside the BMP cannot be encoded and are skipped.

use crate::error::StreamDocError;
use crate::model::{DocumentInfo, PageLayout};
use crate::pipeline::font::OverlayFont;
use crate::pipeline::reconstruct::{DocumentBuilder, PageBuilder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::ImageDecoder;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;
use tracing::{debug, warn};

const PDF_VERSION: &str = "1.5";
const FONT_RESOURCE: &str = "F1";
const IMAGE_RESOURCE: &str = "Im0";

// ── Page ─────────────────────────────────────────────────────────────────

/// Drawing calls recorded for one page; encoded by [`PdfDocumentBuilder::append_page`].
#[derive(Debug, Default)]
pub struct PdfPage {
    layout: Option<PageLayout>,
    background: Option<(Vec<u8>, f32, f32)>,
    alpha: Option<f32>,
    glyphs: Vec<Glyph>,
}

#[derive(Debug, Clone, Copy)]
struct Glyph {
    ch: char,
    x: f32,
    y: f32,
    size: f32,
}

impl PageBuilder for PdfPage {
    fn set_size(&mut self, layout: PageLayout) {
        self.layout = Some(layout);
    }

    fn draw_background_image(&mut self, image: Vec<u8>, width: f32, height: f32) {
        self.background = Some((image, width, height));
    }

    fn set_overlay_alpha(&mut self, alpha: f32) {
        self.alpha = Some(alpha.clamp(0.0, 1.0));
    }

    fn draw_glyph(&mut self, ch: char, left: f32, bottom: f32, font_size: f32) {
        self.glyphs.push(Glyph {
            ch,
            x: left,
            y: bottom,
            size: font_size,
        });
    }
}

// ── Font state ───────────────────────────────────────────────────────────

struct FontState {
    font: OverlayFont,
    /// Reserved `Type0` object id, written at finalize.
    object_id: ObjectId,
    /// TrueType lookups: `None` when the face has no glyph for the char.
    lookups: HashMap<char, Option<(u16, u16)>>,
    /// Glyph id → (first char mapped to it, advance in 1/1000 em).
    used: BTreeMap<u16, (char, u16)>,
}

impl FontState {
    /// Two-byte code for `ch`, or `None` when the font cannot show it.
    fn encode(&mut self, ch: char) -> Option<[u8; 2]> {
        match &self.font {
            OverlayFont::BuiltinCid => {
                let code = u16::try_from(u32::from(ch)).ok()?;
                Some(code.to_be_bytes())
            }
            OverlayFont::TrueType { data, .. } => {
                let (gid, width) = match self.lookups.get(&ch).copied() {
                    Some(found) => found?,
                    None => {
                        let found = lookup_glyph(data, ch);
                        self.lookups.insert(ch, found);
                        found?
                    }
                };
                self.used.entry(gid).or_insert((ch, width));
                Some(gid.to_be_bytes())
            }
        }
    }
}

fn lookup_glyph(data: &[u8], ch: char) -> Option<(u16, u16)> {
    let face = ttf_parser::Face::parse(data, 0).ok()?;
    let gid = face.glyph_index(ch)?;
    if gid.0 == 0 {
        return None;
    }
    let upem = u32::from(face.units_per_em().max(1));
    let advance = u32::from(face.glyph_hor_advance(gid).unwrap_or(0));
    Some((gid.0, (advance * 1000 / upem) as u16))
}

// ── Document ─────────────────────────────────────────────────────────────

/// Builds a PDF in memory with `lopdf`.
pub struct PdfDocumentBuilder {
    doc: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
    font: Option<FontState>,
    /// Opacity (as bits) → ExtGState object.
    gstates: HashMap<u32, ObjectId>,
    skipped_glyphs: usize,
}

impl PdfDocumentBuilder {
    /// Start an empty document. With `font: None` glyphs are dropped and every
    /// page is image-only.
    pub fn new(font: Option<OverlayFont>) -> Self {
        let mut doc = Document::with_version(PDF_VERSION);
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            page_ids: Vec::new(),
            font: font.map(|font| FontState {
                font,
                object_id: (0, 0),
                lookups: HashMap::new(),
                used: BTreeMap::new(),
            }),
            gstates: HashMap::new(),
            skipped_glyphs: 0,
        }
    }

    fn gstate(&mut self, alpha: f32) -> ObjectId {
        let doc = &mut self.doc;
        *self.gstates.entry(alpha.to_bits()).or_insert_with(|| {
            doc.add_object(dictionary! {
                "Type" => "ExtGState",
                "ca" => alpha,
                "CA" => alpha,
            })
        })
    }

    fn font_object_id(&mut self) -> Option<ObjectId> {
        let state = self.font.as_mut()?;
        if state.object_id == (0, 0) {
            state.object_id = self.doc.new_object_id();
        }
        Some(state.object_id)
    }

    /// Operations drawing the glyph overlay, or empty when nothing is drawable.
    fn overlay_operations(&mut self, page: &PdfPage, page_num: usize) -> Vec<Operation> {
        if page.glyphs.is_empty() {
            return Vec::new();
        }
        if self.font.is_none() {
            self.skipped_glyphs += page.glyphs.len();
            return Vec::new();
        }

        let mut text_ops = Vec::with_capacity(page.glyphs.len() * 5);
        let mut skipped = 0usize;
        if let Some(state) = self.font.as_mut() {
            for g in &page.glyphs {
                let Some(code) = state.encode(g.ch) else {
                    skipped += 1;
                    continue;
                };
                text_ops.push(Operation::new("BT", vec![]));
                text_ops.push(Operation::new(
                    "Tf",
                    vec![Object::Name(FONT_RESOURCE.into()), g.size.into()],
                ));
                text_ops.push(Operation::new(
                    "Tm",
                    vec![1.into(), 0.into(), 0.into(), 1.into(), g.x.into(), g.y.into()],
                ));
                text_ops.push(Operation::new(
                    "Tj",
                    vec![Object::String(code.to_vec(), StringFormat::Hexadecimal)],
                ));
                text_ops.push(Operation::new("ET", vec![]));
            }
        }
        if skipped > 0 {
            debug!("Page {}: {} glyphs not encodable in the overlay font", page_num, skipped);
            self.skipped_glyphs += skipped;
        }
        if text_ops.is_empty() {
            return Vec::new();
        }

        let mut ops = vec![Operation::new("q", vec![])];
        if page.alpha.is_some() {
            ops.push(Operation::new("gs", vec![Object::Name(b"GS0".to_vec())]));
        }
        ops.extend(text_ops);
        ops.push(Operation::new("Q", vec![]));
        ops
    }

    fn write_font(&mut self, state: FontState) -> Result<(), StreamDocError> {
        let FontState {
            font,
            object_id,
            used,
            ..
        } = state;
        let type0 = match font {
            OverlayFont::BuiltinCid => self.builtin_font_objects(),
            OverlayFont::TrueType { name, data } => {
                self.truetype_font_objects(&name, data, &used)?
            }
        };
        self.doc.objects.insert(object_id, Object::Dictionary(type0));
        Ok(())
    }

    fn builtin_font_objects(&mut self) -> Dictionary {
        let name = OverlayFont::BuiltinCid.base_font_name().as_bytes().to_vec();
        let descriptor_id = self.doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => Object::Name(name.clone()),
            "Flags" => 6,
            "FontBBox" => Object::Array(vec![0.into(), (-148).into(), 1001.into(), 880.into()]),
            "ItalicAngle" => 0,
            "Ascent" => 880,
            "Descent" => -120,
            "CapHeight" => 880,
            "StemV" => 59,
        });
        let cid_font_id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType0",
            "BaseFont" => Object::Name(name.clone()),
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Korea1"),
                "Supplement" => 1,
            },
            "FontDescriptor" => descriptor_id,
            "DW" => 1000,
        });
        dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => Object::Name(name),
            "Encoding" => "UniKS-UCS2-H",
            "DescendantFonts" => Object::Array(vec![Object::Reference(cid_font_id)]),
        }
    }

    fn truetype_font_objects(
        &mut self,
        name: &str,
        data: Vec<u8>,
        used: &BTreeMap<u16, (char, u16)>,
    ) -> Result<Dictionary, StreamDocError> {
        let (bbox, ascent, descent, cap_height) = {
            let face = ttf_parser::Face::parse(&data, 0)
                .map_err(|e| StreamDocError::Pdf(format!("font '{name}': {e}")))?;
            let scale = 1000.0 / f32::from(face.units_per_em().max(1));
            let s = |v: i16| (f32::from(v) * scale).round() as i64;
            let b = face.global_bounding_box();
            (
                Object::Array(vec![
                    s(b.x_min).into(),
                    s(b.y_min).into(),
                    s(b.x_max).into(),
                    s(b.y_max).into(),
                ]),
                s(face.ascender()),
                s(face.descender()),
                s(face.capital_height().unwrap_or_else(|| face.ascender())),
            )
        };

        let data_len = data.len() as i64;
        let font_file_id = self.doc.add_object(
            flate_stream(dictionary! { "Length1" => data_len }, &data)?,
        );
        let base_font = Object::Name(name.as_bytes().to_vec());
        let descriptor_id = self.doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => base_font.clone(),
            "Flags" => 4,
            "FontBBox" => bbox,
            "ItalicAngle" => 0,
            "Ascent" => ascent,
            "Descent" => descent,
            "CapHeight" => cap_height,
            "StemV" => 80,
            "FontFile2" => font_file_id,
        });

        let mut widths: Vec<Object> = Vec::with_capacity(used.len() * 2);
        for (gid, (_, width)) in used {
            widths.push(i64::from(*gid).into());
            widths.push(Object::Array(vec![i64::from(*width).into()]));
        }
        let cid_font_id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => base_font.clone(),
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor_id,
            "DW" => 1000,
            "W" => widths,
            "CIDToGIDMap" => "Identity",
        });

        let to_unicode_id = self
            .doc
            .add_object(flate_stream(Dictionary::new(), to_unicode_cmap(used).as_bytes())?);

        Ok(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => base_font,
            "Encoding" => "Identity-H",
            "DescendantFonts" => Object::Array(vec![Object::Reference(cid_font_id)]),
            "ToUnicode" => to_unicode_id,
        })
    }
}

impl DocumentBuilder for PdfDocumentBuilder {
    type Page = PdfPage;
    type Output = Document;

    fn set_metadata(&mut self, info: &DocumentInfo) {
        let field = |v: &Option<String>| pdf_text_string(v.as_deref().unwrap_or(""));
        let info_id = self.doc.add_object(dictionary! {
            "Title" => pdf_text_string(info.resolved_title()),
            "Author" => field(&info.author),
            "Subject" => field(&info.subject),
            "Keywords" => field(&info.keywords),
            "Creator" => field(&info.creator),
            "Producer" => field(&info.producer),
        });
        self.doc.trailer.set("Info", info_id);
    }

    fn new_page(&mut self) -> PdfPage {
        PdfPage::default()
    }

    fn append_page(&mut self, page: PdfPage) -> Result<(), StreamDocError> {
        let page_num = self.page_ids.len() + 1;
        let layout = page.layout.ok_or_else(|| {
            StreamDocError::Internal(format!("page {page_num} appended without a size"))
        })?;

        let mut ops = Vec::new();
        let mut resources = Dictionary::new();

        let background = match &page.background {
            Some((bytes, width, height)) => match embed_image(&mut self.doc, bytes, page_num) {
                Ok(image_id) => Some((image_id, *width, *height)),
                Err(e) => {
                    warn!("{}; page is built without a background", e);
                    None
                }
            },
            None => None,
        };
        if let Some((image_id, width, height)) = background {
            resources.set("XObject", dictionary! { IMAGE_RESOURCE => image_id });
            ops.extend([
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![width.into(), 0.into(), 0.into(), height.into(), 0.into(), 0.into()],
                ),
                Operation::new("Do", vec![Object::Name(IMAGE_RESOURCE.into())]),
                Operation::new("Q", vec![]),
            ]);
        }

        let overlay = self.overlay_operations(&page, page_num);
        if !overlay.is_empty() {
            if let Some(font_id) = self.font_object_id() {
                resources.set("Font", dictionary! { FONT_RESOURCE => font_id });
            }
            if let Some(alpha) = page.alpha {
                let gs_id = self.gstate(alpha);
                resources.set("ExtGState", dictionary! { "GS0" => gs_id });
            }
            ops.extend(overlay);
        }

        let content = Content { operations: ops }
            .encode()
            .map_err(|e| StreamDocError::Pdf(format!("page {page_num} content: {e}")))?;
        let content_id = self
            .doc
            .add_object(Stream::new(Dictionary::new(), content));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => Object::Array(vec![0.into(), 0.into(), layout.width.into(), layout.height.into()]),
            "Contents" => content_id,
            "Resources" => resources,
        });
        self.page_ids.push(page_id);
        Ok(())
    }

    fn finalize(mut self) -> Result<Document, StreamDocError> {
        if self.skipped_glyphs > 0 {
            warn!(
                "{} characters could not be placed in the text layer",
                self.skipped_glyphs
            );
        }

        if let Some(state) = self.font.take() {
            if state.object_id != (0, 0) {
                self.write_font(state)?;
            }
        }

        let kids: Vec<Object> = self.page_ids.iter().map(|id| (*id).into()).collect();
        let count = kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.compress();
        Ok(self.doc)
    }
}

// ── Images ───────────────────────────────────────────────────────────────

/// Add `bytes` as an Image XObject and return its id.
fn embed_image(doc: &mut Document, bytes: &[u8], page_num: usize) -> Result<ObjectId, StreamDocError> {
    if let Some(stream) = jpeg_passthrough(bytes) {
        return Ok(doc.add_object(stream));
    }

    let img = image::load_from_memory(bytes).map_err(|e| StreamDocError::ReconstructionFailed {
        page: page_num,
        detail: format!("cannot decode page image: {e}"),
    })?;
    let (width, height) = (i64::from(img.width()), i64::from(img.height()));

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width,
        "Height" => height,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
    };
    if img.color().has_alpha() {
        let alpha: Vec<u8> = img.to_rgba8().pixels().map(|p| p.0[3]).collect();
        let smask_id = doc.add_object(flate_stream(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            &alpha,
        )?);
        dict.set("SMask", smask_id);
    }
    let rgb = img.to_rgb8().into_raw();
    Ok(doc.add_object(flate_stream(dict, &rgb)?))
}

/// A `DCTDecode` stream carrying the JPEG as-is, when its colour model maps
/// directly onto a PDF device space.
fn jpeg_passthrough(bytes: &[u8]) -> Option<Stream> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let decoder = image::codecs::jpeg::JpegDecoder::new(Cursor::new(bytes)).ok()?;
    let (width, height) = decoder.dimensions();
    let color_space = match decoder.color_type() {
        image::ColorType::L8 => "DeviceGray",
        image::ColorType::Rgb8 => "DeviceRGB",
        _ => return None,
    };
    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(width),
        "Height" => i64::from(height),
        "ColorSpace" => color_space,
        "BitsPerComponent" => 8,
        "Filter" => "DCTDecode",
    };
    Some(Stream::new(dict, bytes.to_vec()).with_compression(false))
}

fn flate_stream(mut dict: Dictionary, data: &[u8]) -> Result<Stream, StreamDocError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| StreamDocError::Pdf(format!("deflate: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| StreamDocError::Pdf(format!("deflate: {e}")))?;
    dict.set("Filter", "FlateDecode");
    Ok(Stream::new(dict, compressed).with_compression(false))
}

// ── Strings and CMaps ────────────────────────────────────────────────────

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
fn pdf_text_string(s: &str) -> Object {
    if s.is_ascii() {
        return Object::string_literal(s);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in s.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// ToUnicode CMap mapping each used glyph id back to its character.
fn to_unicode_cmap(used: &BTreeMap<u16, (char, u16)>) -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    let entries: Vec<(&u16, &(char, u16))> = used.iter().collect();
    // At most 100 entries per bfchar block.
    for chunk in entries.chunks(100) {
        let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
        for (gid, (ch, _)) in chunk {
            let mut buf = [0u16; 2];
            let utf16: String = ch
                .encode_utf16(&mut buf)
                .iter()
                .map(|u| format!("{u:04X}"))
                .collect();
            let _ = writeln!(cmap, "<{gid:04X}> <{utf16}>");
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );
    cmap
}

// ── Output ───────────────────────────────────────────────────────────────

/// Serialise `doc` to `path` through a temporary file in the same directory,
/// so a failed save never leaves a truncated PDF behind.
pub fn save_pdf(doc: &mut Document, path: &Path) -> Result<(), StreamDocError> {
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| StreamDocError::Pdf(format!("serialise: {e}")))?;
    write_atomic(path, &bytes)
}

/// Write `bytes` to `path` atomically (temp file + rename).
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StreamDocError> {
    let out_err = |source: std::io::Error| StreamDocError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(out_err)?;

    let tmp = tempfile::NamedTempFile::new_in(parent).map_err(out_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        writer.write_all(bytes).map_err(out_err)?;
        writer.flush().map_err(out_err)?;
    }
    tmp.persist(path).map_err(|e| out_err(e.error))?;
    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
