//! `references.bib` for the papers that ended up on disk.

use std::collections::HashMap;

use paperagent_shared::Paper;

const FORUM_BASE: &str = "https://openreview.net/forum?id=";

/// Citation key: first-author surname, year, first title word. Alphanumeric, lower case.
pub fn cite_key(paper: &Paper) -> String {
    let first_word = paper.title.split_whitespace().next().unwrap_or("untitled");
    format!("{}{}{}", paper.first_author_surname(), paper.year, first_word)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Render `@inproceedings` entries, disambiguating repeated keys with `b`, `c`, ...
pub fn render(papers: &[&Paper]) -> String {
    let mut used: HashMap<String, usize> = HashMap::new();
    let mut entries = Vec::with_capacity(papers.len());

    for paper in papers {
        let base = cite_key(paper);
        let n = used.entry(base.clone()).or_default();
        let key = match *n {
            0 => base,
            k => format!("{base}{}", suffix(k)),
        };
        *n += 1;
        entries.push(entry(paper, &key));
    }

    let mut out = entries.join("\n\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn suffix(k: usize) -> String {
    // 1 → "b", 2 → "c", ... 25 → "z", then numeric.
    if k < 26 {
        char::from(b'a' + k as u8).to_string()
    } else {
        k.to_string()
    }
}

fn entry(paper: &Paper, key: &str) -> String {
    let authors = if paper.authors.is_empty() {
        "Unknown".to_string()
    } else {
        paper.authors.join(" and ")
    };
    let forum = paper.forum.as_deref().unwrap_or(&paper.id);
    format!(
        "@inproceedings{{{key},\n  title = {{{{{title}}}}},\n  author = {{{authors}}},\n  booktitle = {{{booktitle}}},\n  year = {{{year}}},\n  url = {{{FORUM_BASE}{forum}}}\n}}",
        title = escape(&paper.title),
        authors = escape(&authors),
        booktitle = escape(&format!("{} {}", paper.conference, paper.year)),
        year = paper.year,
    )
}

/// Drop unbalanced braces, which would break the surrounding field.
fn escape(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '{' | '}')).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(id: &str, title: &str, authors: &[&str]) -> Paper {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "title": title,
            "authors": authors,
            "conference": "ICLR",
            "year": 2024,
        }))
        .unwrap()
    }

    #[test]
    fn key_and_entry_shape() {
        let p = paper("abc", "Graph-Based {Diffusion}", &["Ada Lovelace", "Alan Turing"]);
        assert_eq!(cite_key(&p), "lovelace2024graphbased");

        let bib = render(&[&p]);
        assert!(bib.starts_with("@inproceedings{lovelace2024graphbased,\n"));
        assert!(bib.contains("  title = {{Graph-Based Diffusion}},\n"));
        assert!(bib.contains("  author = {Ada Lovelace and Alan Turing},\n"));
        assert!(bib.contains("  booktitle = {ICLR 2024},\n"));
        assert!(bib.contains("  url = {https://openreview.net/forum?id=abc}\n}"));
    }

    #[test]
    fn duplicate_keys_get_suffixes() {
        let a = paper("a", "Diffusion one", &["Ada Lovelace"]);
        let b = paper("b", "Diffusion two", &["Ada Lovelace"]);
        let bib = render(&[&a, &b]);
        assert!(bib.contains("@inproceedings{lovelace2024diffusion,"));
        assert!(bib.contains("@inproceedings{lovelace2024diffusionb,"));
    }

    #[test]
    fn missing_authors() {
        let p = paper("x", "Title", &[]);
        assert_eq!(cite_key(&p), "unknown2024title");
        assert!(render(&[&p]).contains("author = {Unknown}"));
        assert_eq!(render(&[]), "");
    }

    #[test]
    fn suffix_runs_through_z_then_numbers() {
        assert_eq!(suffix(1), "b");
        assert_eq!(suffix(24), "y");
        assert_eq!(suffix(25), "z");
        assert_eq!(suffix(26), "26");
    }
}
