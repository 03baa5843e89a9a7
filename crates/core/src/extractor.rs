use crate::error::ExtractError;
use crate::models::{PageText, PdfSource};
use lopdf::{Document, Object, ObjectId};
use reqwest::Client;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// A `TJ` kerning adjustment wider than this (in thousandths of an em) reads as a word gap.
const TJ_WORD_GAP: f32 = -100.0;

/// A decoded PDF whose pages can be read once, in order.
pub struct PdfDocument {
    inner: Document,
}

impl PdfDocument {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ExtractError> {
        let inner =
            Document::load_mem(bytes).map_err(|error| ExtractError::Decode(error.to_string()))?;
        Ok(Self { inner })
    }

    pub fn page_count(&self) -> usize {
        self.inner.get_pages().len()
    }

    /// Yields `(1..=N)` numbered pages. Consumes the document.
    pub fn pages(self) -> PageTexts {
        let page_ids = self.inner.get_pages().into_values().collect::<Vec<_>>();
        PageTexts {
            document: self.inner,
            page_ids: page_ids.into_iter(),
            position: 0,
        }
    }
}

pub struct PageTexts {
    document: Document,
    page_ids: std::vec::IntoIter<ObjectId>,
    position: u32,
}

impl Iterator for PageTexts {
    type Item = PageText;

    fn next(&mut self) -> Option<Self::Item> {
        let page_id = self.page_ids.next()?;
        self.position += 1;

        let text = match text_items(&self.document, page_id) {
            Ok(items) => join_text_items(&items),
            Err(error) => {
                warn!(page = self.position, %error, "page text layer unreadable, using empty text");
                String::new()
            }
        };
        debug!(page = self.position, chars = text.len(), "extracted page");

        Some(PageText {
            number: self.position,
            text,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.page_ids.size_hint()
    }
}

impl ExactSizeIterator for PageTexts {}

/// Text shown by each `Tj`, `TJ`, `'` and `"` operator of a page, in content order.
fn text_items(document: &Document, page_id: ObjectId) -> Result<Vec<String>, lopdf::Error> {
    let encodings = document
        .get_page_fonts(page_id)
        .into_iter()
        .map(|(name, font)| (name, font.get_font_encoding()))
        .collect::<BTreeMap<Vec<u8>, &str>>();
    let content = document.get_and_decode_page_content(page_id)?;

    let mut encoding = None;
    let mut items = Vec::new();
    for operation in &content.operations {
        match operation.operator.as_str() {
            "Tf" => {
                encoding = operation
                    .operands
                    .first()
                    .and_then(|operand| operand.as_name().ok())
                    .and_then(|name| encodings.get(name).copied());
            }
            "Tj" | "'" | "\"" => {
                let shown = operation
                    .operands
                    .iter()
                    .filter_map(|operand| operand.as_str().ok())
                    .map(|bytes| Document::decode_text(encoding, bytes))
                    .collect::<String>();
                items.push(shown);
            }
            "TJ" => {
                let mut shown = String::new();
                for operand in &operation.operands {
                    if let Object::Array(parts) = operand {
                        append_tj_parts(&mut shown, encoding, parts);
                    }
                }
                items.push(shown);
            }
            _ => {}
        }
    }
    Ok(items)
}

fn append_tj_parts(shown: &mut String, encoding: Option<&str>, parts: &[Object]) {
    for part in parts {
        match part {
            Object::String(bytes, _) => shown.push_str(&Document::decode_text(encoding, bytes)),
            Object::Integer(adjust) if (*adjust as f32) < TJ_WORD_GAP => shown.push(' '),
            Object::Real(adjust) if *adjust < TJ_WORD_GAP => shown.push(' '),
            _ => {}
        }
    }
}

/// Joins text items with single spaces, dropping whitespace-only items.
fn join_text_items(items: &[String]) -> String {
    items
        .iter()
        .flat_map(|item| item.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

pub async fn load_source(client: &Client, source: &PdfSource) -> Result<PdfDocument, ExtractError> {
    match source {
        PdfSource::Absent => Err(ExtractError::Absent),
        PdfSource::Local(bytes) => PdfDocument::from_bytes(bytes),
        PdfSource::Remote(url) => {
            let response = client.get(url.clone()).send().await?;
            if !response.status().is_success() {
                return Err(ExtractError::DownloadStatus {
                    url: url.to_string(),
                    status: response.status().as_u16(),
                });
            }
            let bytes = response.bytes().await?;
            PdfDocument::from_bytes(&bytes)
        }
    }
}

pub async fn load_path(path: &Path) -> Result<PdfDocument, ExtractError> {
    let bytes = tokio::fs::read(path).await?;
    PdfDocument::from_bytes(&bytes)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};

    /// Builds a PDF with one page per entry; each entry lists the text runs on that page,
    /// each run in its own text object.
    pub(crate) fn build_pdf(pages: &[&[&str]]) -> Vec<u8> {
        let pages = pages
            .iter()
            .map(|runs| {
                runs.iter()
                    .enumerate()
                    .flat_map(|(line, run)| {
                        vec![
                            Operation::new("BT", vec![]),
                            Operation::new("Tf", vec!["F1".into(), 12.into()]),
                            Operation::new("Td", vec![72.into(), (720 - 20 * line as i64).into()]),
                            Operation::new("Tj", vec![Object::string_literal(*run)]),
                            Operation::new("ET", vec![]),
                        ]
                    })
                    .collect()
            })
            .collect::<Vec<_>>();
        build_pdf_from_operations(pages)
    }

    /// Builds a PDF with one page per entry of raw content operations.
    pub(crate) fn build_pdf_from_operations(pages: Vec<Vec<Operation>>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for operations in pages {
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("content encodes"),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("pdf saves");
        bytes
    }

    fn extract(bytes: &[u8]) -> Vec<PageText> {
        PdfDocument::from_bytes(bytes)
            .expect("pdf decodes")
            .pages()
            .collect()
    }

    #[test]
    fn pages_are_numbered_one_to_n_in_order() {
        let bytes = build_pdf(&[&["Alpha"], &["Bravo"], &["Charlie"], &["Delta"]]);
        let document = PdfDocument::from_bytes(&bytes).expect("pdf decodes");
        assert_eq!(document.page_count(), 4);

        let pages = document.pages();
        assert_eq!(pages.len(), 4);

        let numbers: Vec<u32> = pages.map(|page| page.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[test]
    fn text_runs_are_joined_with_single_spaces() {
        let bytes = build_pdf(&[&["Hydraulic", "pump", "pressure"]]);
        let pages = extract(&bytes);

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "Hydraulic pump pressure");
    }

    #[test]
    fn empty_pages_still_yield_an_entry() {
        let bytes = build_pdf(&[&["Cover"], &[], &["Back"]]);
        let pages = extract(&bytes);

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[1].number, 2);
        assert_eq!(pages[1].text, "");
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let result = PdfDocument::from_bytes(b"%PDF-1.4\n%broken");
        assert!(matches!(result, Err(ExtractError::Decode(_))));
    }

    #[test]
    fn items_in_one_text_object_are_space_separated() {
        let bytes = build_pdf_from_operations(vec![vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal("Hello")]),
            Operation::new("Td", vec![0.into(), (-20).into()]),
            Operation::new("Tj", vec![Object::string_literal("World")]),
            Operation::new("'", vec![Object::string_literal("again")]),
            Operation::new("ET", vec![]),
        ]]);

        let pages = extract(&bytes);
        assert_eq!(pages[0].text, "Hello World again");
    }

    #[test]
    fn tj_arrays_split_words_only_on_wide_gaps() {
        let bytes = build_pdf_from_operations(vec![vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("Hy"),
                    (-20).into(),
                    Object::string_literal("draulic"),
                    (-250).into(),
                    Object::string_literal("pump"),
                ])],
            ),
            Operation::new("Tj", vec![Object::string_literal("rating")]),
            Operation::new("ET", vec![]),
        ]]);

        let pages = extract(&bytes);
        assert_eq!(pages[0].text, "Hydraulic pump rating");
    }

    #[test]
    fn join_collapses_whitespace_and_drops_blank_items() {
        let items = vec![" One ".to_string(), "  ".to_string(), "Two\nThree".to_string()];
        assert_eq!(join_text_items(&items), "One Two Three");
    }

    #[tokio::test]
    async fn absent_source_is_an_error() {
        let client = Client::new();
        let result = load_source(&client, &PdfSource::Absent).await;
        assert!(matches!(result, Err(ExtractError::Absent)));
    }

    #[tokio::test]
    async fn local_source_decodes_in_memory() {
        let client = Client::new();
        let source = PdfSource::Local(build_pdf(&[&["Only page"]]));
        let document = load_source(&client, &source).await.expect("pdf decodes");
        assert_eq!(document.page_count(), 1);
    }

    #[tokio::test]
    async fn path_source_reads_from_disk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, build_pdf(&[&["A"], &["B"]]))?;

        let document = load_path(&path).await?;
        assert_eq!(document.page_count(), 2);
        Ok(())
    }
}
