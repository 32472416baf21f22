//! Parsed Markdown values handed over by the site generator, and the leading
//! metadata block format they are read from.
//!
//! A metadata block sits at the very top of a document:
//!
//! ```text
//! ---
//! title: Hello
//! tags: rust, cli
//! ---
//! # Body starts here
//! ```

use std::collections::HashMap;

const DELIMITER: &str = "---";

/// A parsed Markdown document: rendered HTML, inferred title, and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MarkdownResult {
    html: String,
    title: String,
    metadata: HashMap<String, String>,
}

impl MarkdownResult {
    pub fn new(
        html: impl Into<String>,
        title: impl Into<String>,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            html: html.into(),
            title: title.into(),
            metadata,
        }
    }

    /// The rendered HTML.
    pub fn html(&self) -> &str {
        &self.html
    }

    /// Text of the first top-level heading, ignoring inline modifiers. Empty if none.
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}

/// A metadata entry that cannot be written so that it reads back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    InvalidKey(String),
    InvalidValue { key: String, value: String },
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::InvalidKey(key) => write!(f, "metadata key {key:?} cannot be written"),
            MetadataError::InvalidValue { key, value } => {
                write!(f, "metadata value {value:?} for key {key:?} cannot be written")
            }
        }
    }
}

impl std::error::Error for MetadataError {}

/// Split a document into its metadata mapping and the remaining body.
///
/// Without a leading, closed `---` block the mapping is empty and the whole
/// document is the body. A repeated key keeps its last value.
pub fn split_metadata(markdown: &str) -> (HashMap<String, String>, &str) {
    let mut metadata = HashMap::new();
    let Some(mut rest) = markdown
        .strip_prefix(DELIMITER)
        .and_then(|rest| rest.strip_prefix('\n'))
    else {
        return (metadata, markdown);
    };

    let mut last_key: Option<String> = None;
    loop {
        let Some(line_end) = rest.find('\n').map(|i| i + 1).or_else(|| {
            (!rest.is_empty()).then_some(rest.len())
        }) else {
            // Never closed, so this was not a metadata block.
            return (HashMap::new(), markdown);
        };
        let line = &rest[..line_end];
        rest = &rest[line_end..];
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('-') {
            if trimmed.chars().take_while(|c| *c == '-').count() == 3 {
                return (metadata, rest);
            }
            return (HashMap::new(), markdown);
        }

        match trimmed.split_once(':') {
            Some((key, value)) => {
                let key = key.trim();
                let value = value.trim();
                if !value.is_empty() {
                    metadata.insert(key.to_string(), value.to_string());
                    last_key = Some(key.to_string());
                }
            }
            None => {
                if let Some(value) = last_key.as_ref().and_then(|k| metadata.get_mut(k)) {
                    value.push(' ');
                    value.push_str(trimmed);
                }
            }
        }
    }
}

/// Parse just the metadata mapping of a document.
pub fn parse_metadata(markdown: &str) -> HashMap<String, String> {
    split_metadata(markdown).0
}

/// Write `metadata` as a block that `parse_metadata` reads back unchanged.
/// Entries are sorted by key.
pub fn render_metadata(metadata: &HashMap<String, String>) -> Result<String, MetadataError> {
    let mut entries: Vec<_> = metadata.iter().collect();
    entries.sort();

    let mut block = format!("{DELIMITER}\n");
    for (key, value) in entries {
        if key.is_empty()
            || key.trim() != key
            || key.contains([':', '\n'])
            || key.starts_with('-')
        {
            return Err(MetadataError::InvalidKey(key.clone()));
        }
        if value.is_empty() || value.trim() != value || value.contains('\n') {
            return Err(MetadataError::InvalidValue {
                key: key.clone(),
                value: value.clone(),
            });
        }
        block.push_str(key);
        block.push_str(": ");
        block.push_str(value);
        block.push('\n');
    }
    block.push_str(DELIMITER);
    block.push('\n');
    Ok(block)
}
