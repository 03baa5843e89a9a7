use crate::models::{PageText, PageUpload};

/// Stored form of a page: newlines become spaces and NUL bytes are dropped.
pub fn normalize_content(text: &str) -> String {
    text.replace('\n', " ").replace('\0', "")
}

pub fn normalize_question(text: &str) -> String {
    text.replace('\n', " ")
}

/// A run of consecutive pages uploaded in one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBatch {
    pub index: usize,
    pub pages: Vec<PageUpload>,
}

impl PageBatch {
    pub fn first_page(&self) -> u32 {
        self.pages.first().map(|page| page.page).unwrap_or_default()
    }
}

/// Splits pages into consecutive batches of at most `batch_size` pages.
///
/// A `batch_size` of zero is treated as one.
pub fn plan_batches<I>(doc_id: &str, doc_name: &str, pages: I, batch_size: usize) -> Vec<PageBatch>
where
    I: IntoIterator<Item = PageText>,
{
    let batch_size = batch_size.max(1);
    let mut batches: Vec<PageBatch> = Vec::new();

    for page in pages {
        let upload = PageUpload {
            doc_id: doc_id.to_string(),
            doc_name: doc_name.to_string(),
            page: page.number,
            content: page.text,
        };

        match batches.last_mut() {
            Some(batch) if batch.pages.len() < batch_size => batch.pages.push(upload),
            _ => batches.push(PageBatch {
                index: batches.len(),
                pages: vec![upload],
            }),
        }
    }

    batches
}
