// Semantic text chunking with variable chunk sizes.
// Chunk boundaries follow natural content structure (sections, paragraphs,
// lists, code blocks) rather than fixed character windows; size limits are
// only enforced at the extremes.


use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

static PAGE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[Seite (\d+)\]").expect("page marker regex is valid")
});
static PAGE_MARKER_STRIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[Seite \d+\]\s*").expect("page marker strip regex is valid")
});
static MARKDOWN_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6}\s+.+$").expect("markdown heading regex is valid"));
static NUMBERED_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+(\.\d+)*\.?\s+[A-ZÄÖÜ]").expect("numbered heading regex is valid")
});
static TITLE_WITH_COLON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-ZÄÖÜ][A-ZÄÖÜa-zäöüß\s]{2,60}:$").expect("title colon regex is valid")
});
static LIST_BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*•]\s+").expect("bullet list regex is valid"));
static LIST_NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.)\]]\s+").expect("numbered list regex is valid"));
static LIST_LETTERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][.)\]]\s+").expect("lettered list regex is valid"));
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("paragraph break regex is valid"));

/// Size limits for chunking. Natural boundaries determine actual sizes;
/// these only force merging of fragments and splitting of runaway units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingLimits {
    /// Units shorter than this are merged with their neighbors.
    pub min_chunk_size: usize,
    /// Units longer than this are force-split at paragraph or sentence
    /// boundaries.
    pub max_chunk_size: usize,
}

impl Default for ChunkingLimits {
    #[inline]
    fn default() -> Self {
        Self {
            min_chunk_size: 50,
            max_chunk_size: 4000,
        }
    }
}

/// A single output chunk with its recovered page number, if the text carried
/// a `[Seite N]` marker from page-aware extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    Paragraph,
    Section,
    List,
    Code,
}

#[derive(Debug, Clone)]
struct SemanticUnit {
    kind: UnitKind,
    lines: Vec<String>,
    has_heading: bool,
}

impl SemanticUnit {
    fn new(kind: UnitKind) -> Self {
        Self {
            kind,
            lines: Vec::new(),
            has_heading: false,
        }
    }

    fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn char_len(&self) -> usize {
        // lines are joined with single newlines
        let newlines = self.lines.len().saturating_sub(1);
        self.lines.iter().map(|l| l.chars().count()).sum::<usize>() + newlines
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Extract the first embedded page marker, if any.
pub(crate) fn extract_page_number(text: &str) -> Option<u32> {
    PAGE_MARKER
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Heuristic heading detection: markdown headings, numbered sections,
/// ALL-CAPS lines, Title Case lines ending in a colon, and short
/// title-like phrases.
fn is_heading(line: &str) -> bool {
    let line = line.trim();
    let len = char_len(line);
    if line.is_empty() || len > 200 {
        return false;
    }

    if MARKDOWN_HEADING.is_match(line) || NUMBERED_HEADING.is_match(line) {
        return true;
    }

    // ALL CAPS lines (likely titles)
    let has_cased = line.chars().any(char::is_alphabetic);
    if has_cased && !line.chars().any(char::is_lowercase) && len > 3 && len < 80 {
        return true;
    }

    if TITLE_WITH_COLON.is_match(line) {
        return true;
    }

    // Short line that looks like a title: starts uppercase, no trailing
    // punctuation, most words capitalized or short
    let starts_upper = line.chars().next().is_some_and(char::is_uppercase);
    let ends_plain = line.chars().last().is_some_and(|c| !".!?,;:".contains(c));
    if len < 80 && starts_upper && ends_plain {
        let words: Vec<&str> = line.split_whitespace().collect();
        if (1..=8).contains(&words.len()) {
            let title_words = words
                .iter()
                .filter(|w| {
                    w.chars().next().is_some_and(char::is_uppercase) || char_len(w) <= 3
                })
                .count();
            if title_words * 10 >= words.len() * 6 {
                return true;
            }
        }
    }

    false
}

fn is_list_start(line: &str) -> bool {
    let line = line.trim();
    LIST_BULLET.is_match(line) || LIST_NUMBERED.is_match(line) || LIST_LETTERED.is_match(line)
}

fn is_code_fence(line: &str) -> bool {
    line.trim().starts_with("```")
}

/// Split text into semantic units based on natural boundaries. Each unit is
/// a cohesive piece of content: a section, paragraph, list or code block.
fn split_into_semantic_units(text: &str) -> Vec<SemanticUnit> {
    let mut units = Vec::new();
    let mut current = SemanticUnit::new(UnitKind::Paragraph);
    let mut in_code_block = false;
    let mut consecutive_empty = 0usize;

    for line in text.split('\n') {
        let stripped = line.trim();

        // Code blocks are kept together; fences are never split
        if is_code_fence(line) {
            if in_code_block {
                current.lines.push(line.to_string());
                in_code_block = false;
                continue;
            }
            if !current.lines.is_empty() {
                units.push(current);
            }
            current = SemanticUnit::new(UnitKind::Code);
            current.lines.push(line.to_string());
            in_code_block = true;
            continue;
        }

        if in_code_block {
            current.lines.push(line.to_string());
            continue;
        }

        if stripped.is_empty() {
            consecutive_empty += 1;
            // Double empty line is a strong boundary
            if consecutive_empty >= 2 && !current.lines.is_empty() {
                units.push(std::mem::replace(
                    &mut current,
                    SemanticUnit::new(UnitKind::Paragraph),
                ));
            }
            continue;
        }
        consecutive_empty = 0;

        // A heading always starts a new section
        if is_heading(stripped) {
            if !current.lines.is_empty() {
                units.push(current);
            }
            current = SemanticUnit {
                kind: UnitKind::Section,
                lines: vec![line.to_string()],
                has_heading: true,
            };
            continue;
        }

        if is_list_start(stripped) {
            if current.kind != UnitKind::List && !current.has_heading {
                if !current.lines.is_empty() {
                    units.push(current);
                }
                current = SemanticUnit {
                    kind: UnitKind::List,
                    lines: vec![line.to_string()],
                    has_heading: false,
                };
            } else {
                current.lines.push(line.to_string());
            }
            continue;
        }

        if current.kind == UnitKind::List {
            // Non-list line after a list: an indented line is a
            // continuation, anything else starts a new paragraph
            if line.starts_with("  ") || line.starts_with('\t') {
                current.lines.push(line.to_string());
            } else {
                units.push(std::mem::replace(
                    &mut current,
                    SemanticUnit {
                        kind: UnitKind::Paragraph,
                        lines: vec![line.to_string()],
                        has_heading: false,
                    },
                ));
            }
            continue;
        }

        current.lines.push(line.to_string());
    }

    if !current.lines.is_empty() {
        units.push(current);
    }

    units
}

/// Merge units that are too small to stand alone, without growing any unit
/// past the maximum.
fn merge_small_units(units: Vec<SemanticUnit>, limits: &ChunkingLimits) -> Vec<SemanticUnit> {
    if units.is_empty() {
        return units;
    }

    let mut merged: Vec<SemanticUnit> = Vec::new();
    let mut buffer: Option<SemanticUnit> = None;

    for unit in units {
        let content_len = unit.char_len();

        match buffer.take() {
            None => {
                if content_len < limits.min_chunk_size && !unit.has_heading {
                    buffer = Some(unit);
                } else {
                    merged.push(unit);
                }
            }
            Some(mut buf) => {
                let combined_len = buf.char_len() + content_len + 2;

                if combined_len < limits.max_chunk_size {
                    let unit_has_heading = unit.has_heading;
                    let unit_kind = unit.kind;
                    buf.lines.push(String::new());
                    buf.lines.extend(unit.lines);
                    if unit_has_heading {
                        buf.kind = unit_kind;
                    }
                    buf.has_heading = buf.has_heading || unit_has_heading;

                    if buf.char_len() >= limits.min_chunk_size {
                        merged.push(buf);
                    } else {
                        buffer = Some(buf);
                    }
                } else {
                    merged.push(buf);
                    if content_len < limits.min_chunk_size && !unit.has_heading {
                        buffer = Some(unit);
                    } else {
                        merged.push(unit);
                    }
                }
            }
        }
    }

    if let Some(buf) = buffer {
        match merged.last_mut() {
            Some(last) if last.char_len() + buf.char_len() < limits.max_chunk_size => {
                last.lines.push(String::new());
                last.lines.extend(buf.lines);
            }
            _ => merged.push(buf),
        }
    }

    merged
}

/// Split a sentence-bearing text at `.`/`!`/`?` followed by whitespace,
/// keeping the punctuation with the preceding sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut prev: Option<char> = None;
    let mut iter = text.char_indices().peekable();

    while let Some((idx, ch)) = iter.next() {
        if ch.is_whitespace() && matches!(prev, Some('.' | '!' | '?')) {
            sentences.push(&text[start..idx]);
            // skip the rest of the whitespace run
            let mut next_start = idx + ch.len_utf8();
            while let Some(&(j, c)) = iter.peek() {
                if c.is_whitespace() {
                    iter.next();
                    next_start = j + c.len_utf8();
                } else {
                    next_start = j;
                    break;
                }
            }
            start = next_start;
            prev = None;
            continue;
        }
        prev = Some(ch);
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }

    sentences
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Split a unit exceeding the maximum at natural boundaries: paragraphs
/// first, then sentences within any paragraph that is itself too large.
fn split_oversized_unit(unit: SemanticUnit, limits: &ChunkingLimits) -> Vec<SemanticUnit> {
    let content = unit.text();

    if char_len(&content) <= limits.max_chunk_size {
        return vec![unit];
    }

    let mut results: Vec<SemanticUnit> = Vec::new();
    let mut current_chunk: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for para in PARAGRAPH_BREAK.split(&content) {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        let para_len = char_len(para);

        if current_len + para_len + 2 <= limits.max_chunk_size {
            current_chunk.push(para.to_string());
            current_len += para_len + 2;
            continue;
        }

        if !current_chunk.is_empty() {
            results.push(SemanticUnit {
                kind: unit.kind,
                lines: vec![current_chunk.join("\n\n")],
                has_heading: unit.has_heading && results.is_empty(),
            });
        }

        if para_len > limits.max_chunk_size {
            // Greedily accumulate sentences up to the maximum
            let mut sentence_chunk: Vec<String> = Vec::new();
            let mut sentence_len = 0usize;

            for sentence in split_sentences(para) {
                let len = char_len(sentence);
                if sentence_len + len + 1 <= limits.max_chunk_size {
                    sentence_chunk.push(sentence.to_string());
                    sentence_len += len + 1;
                } else {
                    if !sentence_chunk.is_empty() {
                        results.push(SemanticUnit {
                            kind: UnitKind::Paragraph,
                            lines: vec![sentence_chunk.join(" ")],
                            has_heading: false,
                        });
                    }
                    // A single unsplittable sentence past the maximum is
                    // cut hard; everything else restarts accumulation
                    sentence_chunk = if len <= limits.max_chunk_size {
                        vec![sentence.to_string()]
                    } else {
                        vec![truncate_chars(sentence, limits.max_chunk_size)]
                    };
                    sentence_len = char_len(&sentence_chunk[0]);
                }
            }

            if sentence_chunk.is_empty() {
                current_chunk = Vec::new();
                current_len = 0;
            } else {
                current_chunk = vec![sentence_chunk.join(" ")];
                current_len = char_len(&current_chunk[0]);
            }
        } else {
            current_chunk = vec![para.to_string()];
            current_len = para_len;
        }
    }

    if !current_chunk.is_empty() {
        results.push(SemanticUnit {
            kind: unit.kind,
            lines: vec![current_chunk.join("\n\n")],
            has_heading: false,
        });
    }

    results
}

/// Split document text into variable-sized chunks based on natural content
/// boundaries. A short section stays short, a long paragraph stays together
/// unless it exceeds the hard limit. Deterministic; blank input yields an
/// empty list.
#[inline]
pub fn chunk_text(text: &str, limits: &ChunkingLimits) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let units = split_into_semantic_units(text);
    debug!("Found {} semantic units", units.len());

    let units = merge_small_units(units, limits);
    debug!("After merging: {} units", units.len());

    let mut final_units = Vec::new();
    for unit in units {
        final_units.extend(split_oversized_unit(unit, limits));
    }
    debug!("After splitting oversized: {} units", final_units.len());

    let mut chunks = Vec::new();
    for unit in final_units {
        let content = unit.text().trim().to_string();
        if content.is_empty() {
            continue;
        }

        let page_number = extract_page_number(&content);
        let clean_content = PAGE_MARKER_STRIP
            .replace_all(&content, "")
            .trim()
            .to_string();

        if !clean_content.is_empty() {
            chunks.push(Chunk {
                content: clean_content,
                page_number,
            });
        }
    }

    debug!("Created {} variable-sized chunks", chunks.len());
    chunks
}
