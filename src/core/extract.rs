//! Pulls fenced code blocks and pipe tables out of a finished assistant reply
//! so the REPL can show or copy them by index.

use std::sync::OnceLock;

use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag, TagEnd};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// First word of the fence's info string; `None` for a bare fence.
    pub language: Option<String>,
    pub code: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no {kind} found in the last response")]
    Empty { kind: &'static str },

    #[error("invalid {kind} index: {index} (available: 0..{available})")]
    OutOfRange {
        kind: &'static str,
        index: usize,
        available: usize,
    },
}

/// Extraction results for one response text. Each kind is computed on first
/// use and cached, so repeated calls return the same slices.
#[derive(Debug, Default)]
pub struct ResponseExtractor {
    text: String,
    code_blocks: OnceLock<Vec<CodeBlock>>,
    tables: OnceLock<Vec<String>>,
}

impl ResponseExtractor {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn code_blocks(&self) -> &[CodeBlock] {
        self.code_blocks
            .get_or_init(|| extract_code_blocks(&self.text))
    }

    pub fn tables(&self) -> &[String] {
        self.tables.get_or_init(|| extract_tables(&self.text))
    }

    pub fn code_block(&self, index: usize) -> Result<&CodeBlock, ExtractError> {
        pick(self.code_blocks(), index, "code block")
    }

    pub fn table(&self, index: usize) -> Result<&String, ExtractError> {
        pick(self.tables(), index, "table")
    }
}

fn pick<'a, T>(items: &'a [T], index: usize, kind: &'static str) -> Result<&'a T, ExtractError> {
    if items.is_empty() {
        return Err(ExtractError::Empty { kind });
    }
    items.get(index).ok_or(ExtractError::OutOfRange {
        kind,
        index,
        available: items.len(),
    })
}

/// Fenced blocks that have a closing fence, in document order. Indented code
/// blocks are not collected.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(Option<String>, String, bool)> = None;

    for (event, range) in Parser::new(text).into_offset_iter() {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                let language = info
                    .split_ascii_whitespace()
                    .next()
                    .map(str::to_string);
                let closed = has_closing_fence(&text[range]);
                current = Some((language, String::new(), closed));
            }
            Event::Text(content) => {
                if let Some((_, code, _)) = current.as_mut() {
                    code.push_str(&content);
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some((language, code, closed)) = current.take() {
                    if closed {
                        blocks.push(CodeBlock {
                            language,
                            code: code.trim().to_string(),
                        });
                    }
                }
            }
            _ => {}
        }
    }
    blocks
}

fn has_closing_fence(raw: &str) -> bool {
    let mut lines = raw.trim_end().lines();
    let opening = lines.next();
    let closing = lines.last().map(strip_container_markers);
    match (opening, closing) {
        (Some(_), Some(line)) => {
            line.len() >= 3 && (line.bytes().all(|b| b == b'`') || line.bytes().all(|b| b == b'~'))
        }
        _ => false,
    }
}

/// A line inside a blockquote keeps its `>` markers in the source range.
fn strip_container_markers(line: &str) -> &str {
    let mut rest = line.trim_start();
    while let Some(inner) = rest.strip_prefix('>') {
        rest = inner.trim_start();
    }
    rest.trim_end()
}

/// Raw text of every pipe table.
///
/// A candidate is a maximal run of lines that each start and end with `|`.
/// Only runs containing a header separator row (`|---|:--:|`) count, which
/// keeps prose with stray pipes out.
pub fn extract_tables(text: &str) -> Vec<String> {
    let mut tables = Vec::new();
    let mut run: Vec<&str> = Vec::new();

    for line in text.lines().map(str::trim) {
        if is_pipe_row(line) {
            run.push(line);
            continue;
        }
        flush_run(&mut run, &mut tables);
    }
    flush_run(&mut run, &mut tables);
    tables
}

fn flush_run(run: &mut Vec<&str>, tables: &mut Vec<String>) {
    if run.iter().any(|line| is_separator_row(line)) {
        tables.push(run.join("\n"));
    }
    run.clear();
}

fn is_pipe_row(line: &str) -> bool {
    line.len() >= 2 && line.starts_with('|') && line.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let inner = &line[1..line.len() - 1];
    inner.split('|').all(|cell| {
        let cell = cell.trim();
        let cell = cell.strip_prefix(':').unwrap_or(cell);
        let cell = cell.strip_suffix(':').unwrap_or(cell);
        !cell.is_empty() && cell.bytes().all(|b| b == b'-')
    })
}
