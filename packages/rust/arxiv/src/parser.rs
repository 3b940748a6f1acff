//! arXiv Atom feed parser.
//!
//! The export API answers queries with an Atom feed:
//! - `<entry>` per result
//! - `<id>http://arxiv.org/abs/<id>v<n></id>`
//! - `<title>` (may wrap across lines)
//! - `<link title="pdf" href="..."/>`

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use paperagent_shared::{PaperAgentError, Result};

use crate::extract_arxiv_id;

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ArxivEntry {
    /// Bare id without version, e.g. `2401.00001`.
    pub id: String,
    pub title: String,
    /// `<link title="pdf">` target, when the feed carries one.
    pub pdf_url: Option<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Id,
    Title,
}

/// Parse an Atom feed into entries. Entries without a recognisable id are dropped.
pub fn parse_atom(xml: &str) -> Result<Vec<ArxivEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut in_entry = false;
    let mut field = Field::None;
    let mut id = String::new();
    let mut title = String::new();
    let mut pdf_url: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"entry" => {
                    in_entry = true;
                    id.clear();
                    title.clear();
                    pdf_url = None;
                }
                b"id" if in_entry => field = Field::Id,
                b"title" if in_entry => field = Field::Title,
                b"link" if in_entry => pdf_url = pdf_url.or_else(|| pdf_link(&e)),
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if in_entry && e.local_name().as_ref() == b"link" {
                    pdf_url = pdf_url.or_else(|| pdf_link(&e));
                }
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| PaperAgentError::parse(format!("arXiv feed: {err}")))?;
                match field {
                    Field::Id => id.push_str(&text),
                    Field::Title => {
                        if !title.is_empty() {
                            title.push(' ');
                        }
                        title.push_str(&text);
                    }
                    Field::None => {}
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"id" | b"title" => field = Field::None,
                b"entry" => {
                    in_entry = false;
                    match extract_arxiv_id(&id) {
                        Some(bare) => entries.push(ArxivEntry {
                            id: bare,
                            title: title.split_whitespace().collect::<Vec<_>>().join(" "),
                            pdf_url: pdf_url.take(),
                        }),
                        None => tracing::debug!(raw_id = %id, "skipping entry without arXiv id"),
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PaperAgentError::parse(format!(
                    "arXiv feed at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    Ok(entries)
}

fn pdf_link(e: &BytesStart<'_>) -> Option<String> {
    let mut is_pdf = false;
    let mut href = None;
    for attr in e.attributes().flatten() {
        let value = attr.unescape_value().ok()?;
        match attr.key.as_ref() {
            b"title" => is_pdf = value == "pdf",
            b"href" => href = Some(value.into_owned()),
            _ => {}
        }
    }
    if is_pdf { href } else { None }
}
